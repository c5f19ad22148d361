//! Service health and ad-hoc request handlers

use crate::cli::commands::{HttpVerb, RequestArgs};
use crate::cli::context::CliContext;
use crate::error::{CliError, Result};
use crate::output::{json_output, print_error};
use campaign_sdk::RequestDescriptor;
use console::style;
use serde_json::{json, Map, Value};
use std::path::PathBuf;

/// Handle health command
pub async fn handle_health(config_path: Option<PathBuf>, json: bool) -> Result<()> {
    let context = CliContext::load(config_path)?;
    let results = context.registry.check_all_health().await;

    if json {
        let report: Map<String, Value> = results
            .iter()
            .map(|(kind, health)| (kind.name().to_string(), json!(health)))
            .collect();
        return json_output(&report);
    }

    for (kind, health) in &results {
        let status = if health.is_healthy {
            style("healthy").green()
        } else {
            style("unreachable").red()
        };
        println!(
            "{:<12} {:<12} {}",
            kind.name(),
            status,
            style(context.registry.client(*kind).base_url()).dim()
        );
    }

    let unhealthy = results.iter().filter(|(_, h)| !h.is_healthy).count();
    if unhealthy > 0 {
        print_error(&format!("{unhealthy} of {} services unreachable", results.len()));
    }
    Ok(())
}

/// Handle request command
pub async fn handle_request(config_path: Option<PathBuf>, args: RequestArgs) -> Result<()> {
    let context = CliContext::load(config_path)?;
    let descriptor = build_descriptor(&args)?;

    let envelope = context
        .registry
        .client(args.service)
        .execute::<Value>(descriptor)
        .await;

    match envelope.into_result()? {
        Some(data) => json_output(&data),
        None => Ok(()),
    }
}

fn build_descriptor(args: &RequestArgs) -> Result<RequestDescriptor> {
    let mut descriptor = match args.method {
        HttpVerb::Get => RequestDescriptor::get(args.path.as_str()),
        HttpVerb::Post => RequestDescriptor::post(args.path.as_str()),
        HttpVerb::Put => RequestDescriptor::put(args.path.as_str()),
        HttpVerb::Patch => RequestDescriptor::patch(args.path.as_str()),
        HttpVerb::Delete => RequestDescriptor::delete(args.path.as_str()),
    };

    if !args.query.is_empty() {
        descriptor = descriptor.query(&parse_query(&args.query)?)?;
    }
    if let Some(data) = &args.data {
        let body: Value = serde_json::from_str(data)
            .map_err(|e| CliError::Usage(format!("--data is not valid JSON: {e}")))?;
        descriptor = descriptor.json(&body)?;
    }
    Ok(descriptor)
}

/// Collect `key=value` flags; a repeated key becomes a list
fn parse_query(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut query = Map::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| CliError::Usage(format!("Query '{pair}' must be KEY=VALUE")))?;
        let value = Value::String(value.to_string());
        match query.get_mut(key) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                query.insert(key.to_string(), value);
            }
        }
    }
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_sdk::{RequestBody, ServiceKind};

    fn args(method: HttpVerb, query: &[&str], data: Option<&str>) -> RequestArgs {
        RequestArgs {
            service: ServiceKind::Campaign,
            path: "/campaigns".to_string(),
            method,
            query: query.iter().map(|q| q.to_string()).collect(),
            data: data.map(str::to_string),
        }
    }

    #[test]
    fn test_parse_query_repeats_become_lists() {
        let query = parse_query(&[
            "status=active".to_string(),
            "tag=a".to_string(),
            "tag=b".to_string(),
        ])
        .unwrap();
        assert_eq!(query["status"], json!("active"));
        assert_eq!(query["tag"], json!(["a", "b"]));
    }

    #[test]
    fn test_parse_query_requires_separator() {
        assert!(matches!(
            parse_query(&["status".to_string()]),
            Err(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_build_descriptor() {
        let descriptor =
            build_descriptor(&args(HttpVerb::Post, &["page=2"], Some(r#"{"name":"Spring"}"#)))
                .unwrap();
        assert_eq!(descriptor.method().as_str(), "POST");
        assert_eq!(descriptor.query_pairs(), &[("page".to_string(), "2".to_string())]);
        assert!(matches!(descriptor.body(), RequestBody::Json(_)));
    }

    #[test]
    fn test_build_descriptor_rejects_bad_json() {
        let result = build_descriptor(&args(HttpVerb::Post, &[], Some("{oops")));
        assert!(matches!(result, Err(CliError::Usage(_))));
    }
}
