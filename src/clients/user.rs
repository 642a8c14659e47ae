use std::sync::Arc;

use reqwest::Method;
use tracing::debug;

use crate::{
    clients::service::{RequestConfig, ServiceClient},
    error::ServiceError,
    models::template::UserProfile,
};

#[derive(Clone)]
pub struct UserServiceClient {
    client: Arc<ServiceClient>,
}

impl UserServiceClient {
    pub fn new(client: Arc<ServiceClient>) -> Self {
        Self { client }
    }

    pub async fn get_user_by_id(
        &self,
        user_id: &str,
        request_id: Option<&str>,
    ) -> Result<UserProfile, ServiceError> {
        debug!(user_id, "Fetching user by id");

        let config = RequestConfig::new(Method::GET, &format!("/api/v1/users/{}", user_id));
        self.fetch(config, request_id).await
    }

    pub async fn get_user_by_email(
        &self,
        email: &str,
        request_id: Option<&str>,
    ) -> Result<UserProfile, ServiceError> {
        debug!(email, "Fetching user by email");

        let config = RequestConfig::new(Method::GET, "/api/v1/users").with_query("email", email);
        self.fetch(config, request_id).await
    }

    async fn fetch(
        &self,
        mut config: RequestConfig,
        request_id: Option<&str>,
    ) -> Result<UserProfile, ServiceError> {
        if let Some(request_id) = request_id {
            config = config.with_request_id(request_id);
        }

        let response = self.client.request(config).await?;
        self.client.decode(response.body)
    }
}
