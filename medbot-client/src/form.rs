use medbot_core::{AnalysisResponse, ImageAnalysisResult, TextAnalysisResult};
use tracing::{error, info};

use crate::client::{ApiClient, ImageFile, Result};
use crate::render::{self, Locale};

/// What the user filled into the analysis form.
#[derive(Debug, Clone, Default)]
pub struct FormInput {
    pub image: Option<ImageFile>,
    pub text: String,
    pub speciality: Option<String>,
}

/// Submits the analysis form and keeps the last successful result in two independent slots.
pub struct FormController {
    client: ApiClient,
    results: AnalysisResponse,
    locale: Locale,
}

impl FormController {
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            results: AnalysisResponse::default(),
            locale: Locale::default(),
        }
    }

    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    pub fn set_locale(&mut self, locale: Locale) {
        self.locale = locale;
    }

    pub fn image_analysis(&self) -> Option<&ImageAnalysisResult> {
        self.results.image_analysis.as_ref()
    }

    pub fn text_analysis(&self) -> Option<&TextAnalysisResult> {
        self.results.text_analysis.as_ref()
    }

    pub fn results(&self) -> &AnalysisResponse {
        &self.results
    }

    /// Both slots are replaced by what the server returned. On failure they are left as they were.
    pub async fn submit(&mut self, input: FormInput) -> Result<()> {
        let outcome = self
            .client
            .analyze(input.image, Some(&input.text), input.speciality.as_deref())
            .await;

        match outcome {
            Ok(response) => {
                info!(
                    image = response.image_analysis.is_some(),
                    text = response.text_analysis.is_some(),
                    "Analysis results received"
                );
                self.results = AnalysisResponse {
                    image_analysis: response.image_analysis,
                    text_analysis: response.text_analysis,
                    image_url: response.image_url,
                };
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Analysis submission failed");
                Err(e)
            }
        }
    }

    pub fn render_html(&self) -> String {
        render::html(&self.results, self.locale)
    }

    pub fn render_plain(&self) -> String {
        render::plain(&self.results, self.locale)
    }
}
