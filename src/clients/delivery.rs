use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    clients::{
        consumer::MessageHandler,
        service::{RequestConfig, ServiceClient, ServiceClients},
        template::TemplateServiceClient,
        user::UserServiceClient,
    },
    models::{
        message::{Channel, NotificationMessage},
        template::{Template, UserProfile},
    },
};

pub const DELIVERY_PATH: &str = "/api/v1/deliveries";

#[derive(Debug, Serialize)]
struct DeliveryRequest<'a> {
    #[serde(flatten)]
    notification: &'a NotificationMessage,

    #[serde(skip_serializing_if = "Option::is_none")]
    template: Option<Template>,

    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<UserProfile>,
}

/// Hands each consumed notification to the delivery service for its channel.
pub struct DeliveryForwarder {
    templates: TemplateServiceClient,
    users: UserServiceClient,
    email: Arc<ServiceClient>,
    push: Arc<ServiceClient>,
}

impl DeliveryForwarder {
    pub fn new(clients: &ServiceClients) -> Self {
        Self {
            templates: TemplateServiceClient::new(Arc::clone(&clients.template_service)),
            users: UserServiceClient::new(Arc::clone(&clients.user_service)),
            email: Arc::clone(&clients.email_delivery),
            push: Arc::clone(&clients.push_delivery),
        }
    }

    async fn resolve_template(&self, message: &NotificationMessage) -> Result<Option<Template>, Error> {
        match self
            .templates
            .get_template_by_code(&message.template_code, None, Some(&message.request_id))
            .await
        {
            Ok(template) => Ok(Some(template)),
            Err(e) if e.is_circuit_open() => {
                warn!(
                    notification_id = %message.notification_id,
                    template_code = %message.template_code,
                    "Template service unavailable, forwarding without template"
                );
                Ok(None)
            }
            Err(e) => Err(anyhow!(
                "Failed to resolve template {}: {}",
                message.template_code,
                e
            )),
        }
    }

    /// Profile enrichment is optional; a failed lookup never fails the delivery.
    async fn resolve_user(&self, message: &NotificationMessage) -> Option<UserProfile> {
        let user_id = message.user_id.as_deref()?;

        match self
            .users
            .get_user_by_id(user_id, Some(&message.request_id))
            .await {
            Ok(user) => Some(user),
            Err(e) => {
                debug!(user_id, error = %e, "User lookup failed, continuing without profile");
                None
            }
        }
    }
}

#[async_trait]
impl MessageHandler for DeliveryForwarder {
    async fn handle(&self, message: &NotificationMessage) -> Result<(), Error> {
        let template = self.resolve_template(message).await?;
        let user = self.resolve_user(message).await;

        let client = match message.channel() {
            Channel::Email => &self.email,
            Channel::Push => &self.push,
        };

        let body = client.encode(&DeliveryRequest {
            notification: message,
            template,
            user,
        })?;

        let config = RequestConfig::new(Method::POST, DELIVERY_PATH)
            .with_body(body)
            .with_request_id(&message.request_id);

        client.request(config).await.map_err(|e| {
            anyhow!(
                "Delivery through {} failed for {}: {}",
                client.service_name(),
                message.notification_id,
                e
            )
        })?;

        info!(
            notification_id = %message.notification_id,
            delivery_service = %client.service_name(),
            "Notification handed to delivery service"
        );

        Ok(())
    }
}
