//! Query entry point shared by the CLI and the HTTP shell.
//!
//! Validates the raw input, loads the dataset through the registry, builds a
//! reasoning client for the requested model and hands the request to the
//! selected strategy.

use crate::config::{AppConfig, DatasetConfig, DatasetSourceConfig, SUPPORTED_MODELS};
use crate::dataset::{ApifySource, DatasetRegistry, DatasetSource, DirectorySource};
use crate::error::{ExternalCallError, QueryError, Result};
use crate::llm::{LanguageModel, ModelProvider, OpenAiProvider};
use crate::orchestration::pipeline_for;
use crate::query::{AnswerEnvelope, QueryOptions, QueryRequest, Strategy};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::sync::Arc;
use tracing::Instrument as _;

pub const APIFY_TOKEN_ENV: &str = "APIFY_TOKEN";

fn default_true() -> bool {
    true
}

fn secret<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<SecretString>, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|key| !key.is_empty())
        .map(|key| SecretString::new(key.into())))
}

/// Raw query input as received from a caller (JSON body or query string).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryInput {
    /// Natural language or SQL.
    pub query: String,
    #[serde(default)]
    pub dataset_id: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    /// Falls back to `OPENAI_API_KEY` when absent.
    #[serde(default, deserialize_with = "secret")]
    pub llm_provider_api_key: Option<SecretString>,
    #[serde(default)]
    pub refresh_dataset: bool,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub use_agent: bool,
    #[serde(default = "default_true")]
    pub synthesize: bool,
    /// Platform webhook payload; its default dataset wins over `datasetId`.
    #[serde(default)]
    pub payload: Option<WebhookPayload>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    #[serde(default)]
    pub resource: Option<WebhookResource>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResource {
    #[serde(default)]
    pub default_dataset_id: Option<String>,
}

impl QueryInput {
    pub fn new(query: impl Into<String>, dataset_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            dataset_id: Some(dataset_id.into()),
            model_name: None,
            llm_provider_api_key: None,
            refresh_dataset: false,
            limit: None,
            offset: None,
            use_agent: false,
            synthesize: true,
            payload: None,
        }
    }

    /// The webhook dataset if present, else `datasetId`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidInput`] when neither is given.
    pub fn resolve_dataset_id(&self) -> Result<&str> {
        self.payload
            .as_ref()
            .and_then(|payload| payload.resource.as_ref())
            .and_then(|resource| resource.default_dataset_id.as_deref())
            .or(self.dataset_id.as_deref())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| QueryError::InvalidInput("datasetId is required".to_owned()))
    }

    /// # Errors
    ///
    /// Returns [`QueryError::InvalidInput`] for models outside the allow-list.
    pub fn resolve_model<'a>(&'a self, default_model: &'a str) -> Result<&'a str> {
        let model = self.model_name.as_deref().unwrap_or(default_model);
        if SUPPORTED_MODELS.contains(&model) {
            Ok(model)
        } else {
            Err(QueryError::InvalidInput(format!(
                "unsupported model `{model}`, expected one of: {}",
                SUPPORTED_MODELS.join(", ")
            )))
        }
    }

    fn validate_query(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(QueryError::InvalidInput("query must not be empty".to_owned()));
        }
        Ok(())
    }
}

/// Build the dataset source named by the configuration.
pub fn source_from_config(config: &DatasetConfig) -> Arc<dyn DatasetSource> {
    match &config.source {
        DatasetSourceConfig::Apify { base_url } => Arc::new(ApifySource::new(
            base_url.clone(),
            std::env::var(APIFY_TOKEN_ENV).ok(),
        )),
        DatasetSourceConfig::Directory { path } => Arc::new(DirectorySource::new(path.clone())),
    }
}

/// Long-lived query service; one per process.
pub struct QueryService {
    config: AppConfig,
    registry: DatasetRegistry,
    provider: Arc<dyn ModelProvider>,
}

impl QueryService {
    pub fn new(
        config: AppConfig,
        source: Arc<dyn DatasetSource>,
        provider: Arc<dyn ModelProvider>,
    ) -> Self {
        Self {
            config,
            registry: DatasetRegistry::new(source),
            provider,
        }
    }

    /// Service wired to the configured dataset source and OpenAI.
    pub fn from_config(config: AppConfig) -> Self {
        let source = source_from_config(&config.dataset);
        let provider = Arc::new(OpenAiProvider::new(config.llm.clone()));
        Self::new(config, source, provider)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &DatasetRegistry {
        &self.registry
    }

    fn model(&self, model_name: &str, input: &QueryInput) -> Result<Arc<dyn LanguageModel>> {
        self.provider
            .model(model_name, input.llm_provider_api_key.as_ref())
            .map_err(|err| match err {
                ExternalCallError::MissingCredential => QueryError::InvalidInput(format!(
                    "{err}: pass llmProviderApiKey or set OPENAI_API_KEY"
                )),
                other => QueryError::External(other),
            })
    }

    /// Answer one query end to end.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidInput`] for bad input, otherwise whatever
    /// dataset loading or the selected strategy fails with.
    pub async fn answer(&self, input: QueryInput) -> Result<AnswerEnvelope> {
        input.validate_query()?;
        let dataset_id = input.resolve_dataset_id()?;
        let model_name = input.resolve_model(&self.config.llm.model)?;
        let strategy = Strategy::from_flag(input.use_agent);

        let span = tracing::info_span!(
            "query",
            request_id = tracing::field::Empty,
            dataset_id,
            model = model_name,
            strategy = ?strategy,
        );

        async {
            let model = self.model(model_name, &input)?;
            let dataset = self.registry.load(dataset_id, input.refresh_dataset).await?;

            let options = QueryOptions {
                limit: input.limit,
                offset: input.offset,
                refresh: input.refresh_dataset,
                use_agent: input.use_agent,
                model_name: model_name.to_owned(),
                synthesize: input.synthesize,
            };
            let request = QueryRequest::new(
                input.query.trim(),
                self.config.dataset.table_name.as_str(),
                dataset,
                options,
            );
            tracing::Span::current()
                .record("request_id", tracing::field::display(request.request_id()));

            let pipeline = pipeline_for(strategy, model, &self.config);
            match pipeline.run_pipeline(&request).await {
                Ok(answer) => {
                    tracing::info!(
                        rows = answer.execution.row_count,
                        synthesized = answer.synthesized_text.is_some(),
                        elapsed_ms = answer.metadata.elapsed_ms,
                        "Query answered"
                    );
                    Ok(answer)
                }
                Err(err) => {
                    tracing::warn!(kind = %err.kind(), "Query failed: {err}");
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }
}
