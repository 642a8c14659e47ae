use std::sync::Arc;

use reqwest::Method;
use tracing::debug;

use crate::{
    clients::service::{RequestConfig, ServiceClient},
    error::ServiceError,
    models::template::Template,
};

const DEFAULT_LANGUAGE: &str = "en";

#[derive(Clone)]
pub struct TemplateServiceClient {
    client: Arc<ServiceClient>,
}

impl TemplateServiceClient {
    pub fn new(client: Arc<ServiceClient>) -> Self {
        Self { client }
    }

    pub async fn get_template_by_code(
        &self,
        template_code: &str,
        language: Option<&str>,
        request_id: Option<&str>,
    ) -> Result<Template, ServiceError> {
        let language = language.unwrap_or(DEFAULT_LANGUAGE);

        debug!(template_code, language, "Fetching template from service");

        let mut config =
            RequestConfig::new(Method::GET, &format!("/api/v1/templates/{}", template_code))
                .with_query("lang", language);

        if let Some(request_id) = request_id {
            config = config.with_request_id(request_id);
        }

        let response = self.client.request(config).await?;
        self.client.decode(response.body)
    }
}
