use anyhow::{Result, anyhow};

use crate::models::message::{DeliveryTarget, NotificationMessage};

pub fn validate_push_token(token: &str) -> Result<()> {
    if token.is_empty() {
        return Err(anyhow!("Push token cannot be empty"));
    }

    if token.len() < 20 {
        return Err(anyhow!("Push token too short (minimum 20 characters)"));
    }

    if token.len() > 200 {
        return Err(anyhow!("Push token too long (maximum 200 characters)"));
    }

    let valid_chars = token
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == ':' || c == '.');

    if !valid_chars {
        return Err(anyhow!("Push token contains invalid characters"));
    }

    Ok(())
}

pub fn validate_email(address: &str) -> Result<()> {
    if address.is_empty() {
        return Err(anyhow!("Recipient email cannot be empty"));
    }

    if address.chars().any(char::is_whitespace) {
        return Err(anyhow!("Recipient email contains whitespace"));
    }

    let (local, domain) = address
        .split_once('@')
        .ok_or_else(|| anyhow!("Recipient email is missing '@'"))?;

    if local.is_empty() || domain.contains('@') {
        return Err(anyhow!("Recipient email is malformed"));
    }

    let labels_ok = domain.split('.').count() >= 2 && domain.split('.').all(|l| !l.is_empty());
    if !labels_ok {
        return Err(anyhow!("Recipient email domain is malformed"));
    }

    Ok(())
}

pub fn validate_template_code(code: &str) -> Result<()> {
    if code.trim().is_empty() {
        return Err(anyhow!("Template code cannot be empty"));
    }

    Ok(())
}

pub fn validate_priority(priority: u8) -> Result<()> {
    if !(1..=10).contains(&priority) {
        return Err(anyhow!("Priority must be between 1 and 10, got {}", priority));
    }

    Ok(())
}

/// Checks a message as a whole, whether built by a producer or read off a queue.
pub fn validate_message(message: &NotificationMessage) -> Result<()> {
    if message.notification_id.trim().is_empty() {
        return Err(anyhow!("Notification id cannot be empty"));
    }

    match &message.target {
        DeliveryTarget::Email { recipient } => validate_email(recipient)?,
        DeliveryTarget::Push { recipient, .. } => validate_push_token(recipient)?,
    }

    validate_template_code(&message.template_code)?;
    validate_priority(message.priority)?;

    Ok(())
}
