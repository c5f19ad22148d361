//! Authentication command handlers

use crate::cli::context::CliContext;
use crate::error::{CliError, Result};
use crate::output::{json_output, print_info, print_success};
use campaign_sdk::{LoginCredentials, RegisterRequest, UserProfile, UserRole};
use console::style;
use dialoguer::{Input, Password};
use std::path::PathBuf;
use tracing::debug;

/// Handle login command
pub async fn handle_login(
    config_path: Option<PathBuf>,
    email: Option<String>,
    password: Option<String>,
    json: bool,
) -> Result<()> {
    let context = CliContext::load(config_path)?;
    let email = match email {
        Some(email) => email,
        None => Input::<String>::new().with_prompt("Email").interact_text()?,
    };
    let password = match password {
        Some(password) => password,
        None => Password::new().with_prompt("Password").interact()?,
    };

    debug!(email = %email, "Starting login");
    let session = context.registry.session_controller();
    let signed_in = session
        .login(&LoginCredentials::new(email, password))
        .await?;

    // The process may exit before a background profile fetch lands
    let user = match signed_in.user {
        Some(user) => Some(user),
        None => session.refresh_profile().await.ok(),
    };

    if json {
        return json_output(&session.session());
    }
    match user {
        Some(user) => print_success(&format!("Signed in as {}", display_name(&user))),
        None => print_success("Signed in"),
    }
    Ok(())
}

/// Handle logout command
pub async fn handle_logout(config_path: Option<PathBuf>) -> Result<()> {
    let context = CliContext::load(config_path)?;
    if context.tokens().access_token().is_none() {
        print_info("Not signed in");
        return Ok(());
    }

    context.registry.session_controller().logout().await;
    print_success("Signed out");
    Ok(())
}

/// Handle whoami command
pub async fn handle_whoami(config_path: Option<PathBuf>, json: bool) -> Result<()> {
    let context = CliContext::load(config_path)?;
    let session = context.registry.session_controller().initialize().await;

    if json {
        return json_output(&session);
    }

    match (&session.user, &session.error) {
        (Some(user), _) => print!("{}", render_profile(user)),
        (None, Some(error)) => {
            return Err(CliError::Usage(format!("Could not load profile: {error}")));
        }
        (None, None) => print_info("Not signed in"),
    }
    Ok(())
}

/// Handle register command
pub async fn handle_register(
    config_path: Option<PathBuf>,
    email: Option<String>,
    full_name: Option<String>,
    role: Option<String>,
) -> Result<()> {
    let context = CliContext::load(config_path)?;
    let email = match email {
        Some(email) => email,
        None => Input::<String>::new().with_prompt("Email").interact_text()?,
    };
    let password = Password::new()
        .with_prompt("Password")
        .with_confirmation("Confirm password", "Passwords do not match")
        .interact()?;

    let request = RegisterRequest {
        email,
        password,
        full_name,
        role: role.map(UserRole::from),
    };
    let outcome = context
        .registry
        .session_controller()
        .register(&request)
        .await?;

    print_success(&format!("Account created for {}", outcome.email));
    if outcome.requires_verification {
        print_info("Check your inbox to verify the account before signing in");
    }
    Ok(())
}

fn display_name(user: &UserProfile) -> &str {
    user.full_name.as_deref().unwrap_or(&user.email)
}

fn render_profile(user: &UserProfile) -> String {
    format!(
        "{}\n  email: {}\n  role:  {}\n  id:    {}\n",
        style(display_name(user)).bold(),
        user.email,
        user.role.map_or("unknown", |role| role.as_str()),
        user.id
    )
}
