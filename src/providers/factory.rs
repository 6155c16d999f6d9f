//! Provider factory: given `(provider_name, model?)`, constructs the
//! appropriate back-end client, resolving credentials from [`RunConfig`].

use std::sync::Arc;

use crate::{config::RunConfig, error::AppError};

use super::{
    anthropic::AnthropicClient, cerebras::CerebrasClient, deepseek::DeepSeekClient,
    google::GoogleClient, local::LocalClient, openai::OpenAIClient,
    openrouter::OpenRouterClient, zai::ZAiClient, AIProvider, Provider,
};

/// Constructs a provider client for `provider`.
///
/// `provider = "auto"` picks the first back-end whose credential is
/// present, walking [`Provider::auto_fallback_order`], with a preference for
/// `Anthropic` when `model` names a Claude model.
///
/// # Errors
/// Returns `AppError::Config` when a named provider's credential is absent,
/// or when `auto` finds no viable back-end at all (`local` is always
/// viable, so this can only happen if `local` itself fails to construct).
pub fn build_provider(
    provider: &str,
    model: Option<&str>,
    cfg: &RunConfig,
) -> Result<Arc<dyn AIProvider>, AppError> {
    if provider.eq_ignore_ascii_case("auto") {
        return build_auto(model, cfg);
    }

    let tag = Provider::from_alias(provider)
        .ok_or_else(|| AppError::Config(format!("unknown provider '{provider}'")))?;
    build_named(tag, model, cfg)
}

fn build_auto(model: Option<&str>, cfg: &RunConfig) -> Result<Arc<dyn AIProvider>, AppError> {
    let prefers_claude = model.is_some_and(Provider::model_implies_claude);

    let mut order: Vec<Provider> = Provider::auto_fallback_order().to_vec();
    if prefers_claude {
        order.retain(|p| *p != Provider::Anthropic);
        order.insert(0, Provider::Anthropic);
    }

    for tag in order {
        if credential_present(tag, cfg) {
            return build_named(tag, model, cfg);
        }
    }

    // `local` never requires a credential, so this is unreachable in
    // practice; kept as a defensive fallback.
    build_named(Provider::Local, model, cfg)
}

fn credential_present(tag: Provider, cfg: &RunConfig) -> bool {
    match tag {
        Provider::Anthropic => cfg.anthropic_api_key.is_some(),
        Provider::OpenAI => cfg.openai_api_key.is_some(),
        Provider::Google => cfg.google_api_key.is_some(),
        Provider::OpenRouter => cfg.openrouter_api_key.is_some(),
        Provider::Cerebras => cfg.cerebras_api_key.is_some(),
        Provider::DeepSeek => cfg.deepseek_api_key.is_some(),
        Provider::ZAi => cfg.zai_api_key.is_some(),
        Provider::Local => true,
    }
}

fn build_named(
    tag: Provider,
    model: Option<&str>,
    cfg: &RunConfig,
) -> Result<Arc<dyn AIProvider>, AppError> {
    let timeout = cfg.http_timeout;
    match tag {
        Provider::OpenAI => {
            let key = require_key(cfg.openai_api_key.as_deref(), tag)?;
            let model = model.unwrap_or(super::openai::DEFAULT_MODEL).to_string();
            let client = OpenAIClient::new(key, cfg.openai_base_url.clone(), model, timeout)
                .map_err(AppError::Config)?;
            Ok(Arc::new(client))
        }
        Provider::Anthropic => {
            let key = require_key(cfg.anthropic_api_key.as_deref(), tag)?;
            let model = model.unwrap_or(super::anthropic::DEFAULT_MODEL).to_string();
            let client = AnthropicClient::new(key, cfg.anthropic_base_url.clone(), model, timeout)
                .map_err(AppError::Config)?;
            Ok(Arc::new(client))
        }
        Provider::Google => {
            let key = require_key(cfg.google_api_key.as_deref(), tag)?;
            let model = model.unwrap_or(super::google::DEFAULT_MODEL).to_string();
            let client = GoogleClient::new(key, cfg.google_base_url.clone(), model, timeout)
                .map_err(AppError::Config)?;
            Ok(Arc::new(client))
        }
        Provider::OpenRouter => {
            let key = require_key(cfg.openrouter_api_key.as_deref(), tag)?;
            let model = model.unwrap_or(super::openrouter::DEFAULT_MODEL).to_string();
            let client =
                OpenRouterClient::new(key, cfg.openrouter_base_url.clone(), model, timeout)
                    .map_err(AppError::Config)?;
            Ok(Arc::new(client))
        }
        Provider::Cerebras => {
            let key = require_key(cfg.cerebras_api_key.as_deref(), tag)?;
            let model = model.unwrap_or(super::cerebras::DEFAULT_MODEL).to_string();
            let client = CerebrasClient::new(key, cfg.cerebras_base_url.clone(), model, timeout)
                .map_err(AppError::Config)?;
            Ok(Arc::new(client))
        }
        Provider::DeepSeek => {
            let key = require_key(cfg.deepseek_api_key.as_deref(), tag)?;
            let model = model.unwrap_or(super::deepseek::DEFAULT_MODEL).to_string();
            let client = DeepSeekClient::new(key, cfg.deepseek_base_url.clone(), model, timeout)
                .map_err(AppError::Config)?;
            Ok(Arc::new(client))
        }
        Provider::ZAi => {
            let key = require_key(cfg.zai_api_key.as_deref(), tag)?;
            let model = model.unwrap_or(super::zai::DEFAULT_MODEL).to_string();
            let client = ZAiClient::new(key, cfg.zai_base_url.clone(), model, timeout)
                .map_err(AppError::Config)?;
            Ok(Arc::new(client))
        }
        Provider::Local => {
            let model = model.unwrap_or(super::local::DEFAULT_MODEL).to_string();
            let client = LocalClient::new(cfg.local_base_url.clone(), model, timeout)
                .map_err(AppError::Config)?;
            Ok(Arc::new(client))
        }
    }
}

fn require_key(key: Option<&str>, tag: Provider) -> Result<String, AppError> {
    key.map(ToString::to_string)
        .ok_or_else(|| AppError::Config(format!("no credential configured for provider '{tag}'")))
}
