//! Bundled provider × model database.
//!
//! The first merge stage of the registry. Capability, cost and limit
//! defaults live here; user configuration, environment credentials and
//! custom loaders refine them in later stages.

use crate::model::{
    CredentialSource, Interleaved, ModalitySupport, ModelCapabilities, ModelCost, ModelInfo,
    ModelLimit, ModelStatus, Provider,
};
use std::collections::HashMap;

/// Driver family for Anthropic's first-party API.
pub const API_ANTHROPIC: &str = "@ai-sdk/anthropic";
/// Driver family for OpenAI's first-party API.
pub const API_OPENAI: &str = "@ai-sdk/openai";
/// Driver family for generic OpenAI-compatible HTTP endpoints.
pub const API_OPENAI_COMPATIBLE: &str = "@ai-sdk/openai-compatible";
/// Driver family for Amazon Bedrock.
pub const API_BEDROCK: &str = "@ai-sdk/amazon-bedrock";
/// Driver family for Ollama's native chat endpoint.
pub const API_OLLAMA: &str = "ollama";
/// Driver family for Owiseman gateways.
pub const API_OWISEMAN: &str = "owiseman";

/// The full bundled catalog, keyed by provider ID.
pub fn bundled() -> HashMap<String, Provider> {
    let providers = vec![
        anthropic(),
        openai(),
        google(),
        google_vertex(),
        bedrock(),
        azure(),
        cloudflare_gateway(),
        sap_ai_core(),
        github_copilot(),
        opencode(),
        groq(),
        mistral(),
        xai(),
        deepseek(),
        ollama(),
        owiseman(),
    ];
    providers.into_iter().map(|p| (p.id.clone(), p)).collect()
}

fn provider(
    id: &str,
    name: &str,
    api: &str,
    env: &[&str],
    base_url: Option<&str>,
    models: Vec<ModelInfo>,
) -> Provider {
    Provider {
        id: id.to_string(),
        name: name.to_string(),
        api: api.to_string(),
        source: CredentialSource::Config,
        env: env.iter().map(|s| s.to_string()).collect(),
        api_key: None,
        base_url: base_url.map(|s| s.to_string()),
        options: serde_json::Map::new(),
        tool_call_mode: None,
        models: models.into_iter().map(|m| (m.id.clone(), m)).collect(),
    }
}

/// Frontier-model capability template: vision + pdf input, tools,
/// reasoning, interleaved thinking.
fn frontier_caps() -> ModelCapabilities {
    ModelCapabilities {
        temperature: true,
        reasoning: true,
        attachment: true,
        tool_call: true,
        interleaved: Interleaved::Bool(true),
        input: ModalitySupport {
            text: true,
            image: true,
            audio: false,
            video: false,
            pdf: true,
        },
        output: ModalitySupport::default(),
    }
}

/// Text-only tool-calling template.
fn text_caps() -> ModelCapabilities {
    ModelCapabilities {
        temperature: true,
        reasoning: false,
        attachment: false,
        tool_call: true,
        interleaved: Interleaved::Bool(false),
        input: ModalitySupport::default(),
        output: ModalitySupport::default(),
    }
}

fn model(
    id: &str,
    provider_id: &str,
    name: &str,
    family: &str,
    caps: ModelCapabilities,
    cost: ModelCost,
    limit: ModelLimit,
) -> ModelInfo {
    ModelInfo {
        id: id.to_string(),
        provider_id: provider_id.to_string(),
        api_id: id.to_string(),
        name: name.to_string(),
        family: Some(family.to_string()),
        release_date: None,
        capabilities: caps,
        cost,
        limit,
        status: ModelStatus::Active,
        options: serde_json::Map::new(),
        headers: HashMap::new(),
        variants: HashMap::new(),
    }
}

fn anthropic() -> Provider {
    provider(
        "anthropic",
        "Anthropic",
        API_ANTHROPIC,
        &["ANTHROPIC_API_KEY"],
        Some("https://api.anthropic.com"),
        vec![
            model(
                "claude-sonnet-4-5",
                "anthropic",
                "Claude Sonnet 4.5",
                "claude-sonnet-4",
                frontier_caps(),
                ModelCost {
                    input: 3.0,
                    output: 15.0,
                    cache_read: 0.3,
                    cache_write: 3.75,
                    over_200k: None,
                },
                ModelLimit {
                    context: 200_000,
                    output: 64_000,
                },
            ),
            model(
                "claude-opus-4-5",
                "anthropic",
                "Claude Opus 4.5",
                "claude-opus-4",
                frontier_caps(),
                ModelCost {
                    input: 5.0,
                    output: 25.0,
                    cache_read: 0.5,
                    cache_write: 6.25,
                    over_200k: None,
                },
                ModelLimit {
                    context: 200_000,
                    output: 64_000,
                },
            ),
            model(
                "claude-haiku-4-5",
                "anthropic",
                "Claude Haiku 4.5",
                "claude-haiku-4",
                frontier_caps(),
                ModelCost {
                    input: 1.0,
                    output: 5.0,
                    cache_read: 0.1,
                    cache_write: 1.25,
                    over_200k: None,
                },
                ModelLimit {
                    context: 200_000,
                    output: 64_000,
                },
            ),
            model(
                "claude-3-5-haiku",
                "anthropic",
                "Claude 3.5 Haiku",
                "claude-3.5",
                text_caps(),
                ModelCost {
                    input: 0.8,
                    output: 4.0,
                    cache_read: 0.08,
                    cache_write: 1.0,
                    over_200k: None,
                },
                ModelLimit {
                    context: 200_000,
                    output: 8_192,
                },
            ),
        ],
    )
}

fn openai() -> Provider {
    provider(
        "openai",
        "OpenAI",
        API_OPENAI,
        &["OPENAI_API_KEY"],
        Some("https://api.openai.com/v1"),
        vec![
            model(
                "gpt-5",
                "openai",
                "GPT-5",
                "gpt-5",
                frontier_caps(),
                ModelCost {
                    input: 2.5,
                    output: 10.0,
                    cache_read: 1.25,
                    cache_write: 0.0,
                    over_200k: None,
                },
                ModelLimit {
                    context: 256_000,
                    output: 32_768,
                },
            ),
            model(
                "gpt-5-mini",
                "openai",
                "GPT-5 mini",
                "gpt-5",
                frontier_caps(),
                ModelCost {
                    input: 0.4,
                    output: 1.6,
                    cache_read: 0.2,
                    cache_write: 0.0,
                    over_200k: None,
                },
                ModelLimit {
                    context: 128_000,
                    output: 16_384,
                },
            ),
            model(
                "gpt-5-nano",
                "openai",
                "GPT-5 nano",
                "gpt-5",
                text_caps(),
                ModelCost {
                    input: 0.1,
                    output: 0.4,
                    cache_read: 0.05,
                    cache_write: 0.0,
                    over_200k: None,
                },
                ModelLimit {
                    context: 128_000,
                    output: 16_384,
                },
            ),
            {
                let mut preview = model(
                    "gpt-5.5-preview",
                    "openai",
                    "GPT-5.5 (preview)",
                    "gpt-5",
                    frontier_caps(),
                    ModelCost::default(),
                    ModelLimit {
                        context: 256_000,
                        output: 32_768,
                    },
                );
                preview.status = ModelStatus::Alpha;
                preview
            },
        ],
    )
}

fn google() -> Provider {
    provider(
        "google",
        "Google",
        API_OPENAI_COMPATIBLE,
        &["GEMINI_API_KEY", "GOOGLE_GENERATIVE_AI_API_KEY"],
        Some("https://generativelanguage.googleapis.com/v1beta/openai"),
        vec![
            model(
                "gemini-3-pro",
                "google",
                "Gemini 3 Pro",
                "gemini-3",
                frontier_caps(),
                ModelCost {
                    input: 2.0,
                    output: 12.0,
                    cache_read: 0.2,
                    cache_write: 0.0,
                    over_200k: Some(crate::model::CostTier {
                        input: 4.0,
                        output: 18.0,
                        cache_read: 0.4,
                        cache_write: 0.0,
                    }),
                },
                ModelLimit {
                    context: 1_000_000,
                    output: 65_536,
                },
            ),
            model(
                "gemini-3-flash",
                "google",
                "Gemini 3 Flash",
                "gemini-3",
                text_caps(),
                ModelCost {
                    input: 0.3,
                    output: 2.5,
                    cache_read: 0.03,
                    cache_write: 0.0,
                    over_200k: None,
                },
                ModelLimit {
                    context: 1_000_000,
                    output: 65_536,
                },
            ),
            model(
                "gemini-2.5-flash",
                "google",
                "Gemini 2.5 Flash",
                "gemini-2.5",
                text_caps(),
                ModelCost {
                    input: 0.15,
                    output: 0.6,
                    cache_read: 0.0375,
                    cache_write: 0.0,
                    over_200k: None,
                },
                ModelLimit {
                    context: 1_000_000,
                    output: 65_536,
                },
            ),
        ],
    )
}

fn google_vertex() -> Provider {
    provider(
        "google-vertex",
        "Google Vertex AI",
        API_OPENAI_COMPATIBLE,
        &[
            "GOOGLE_CLOUD_PROJECT",
            "GCLOUD_PROJECT",
            "GOOGLE_CLOUD_LOCATION",
            "GOOGLE_CLOUD_REGION",
        ],
        None,
        vec![model(
            "gemini-3-pro",
            "google-vertex",
            "Gemini 3 Pro (Vertex)",
            "gemini-3",
            frontier_caps(),
            ModelCost {
                input: 2.0,
                output: 12.0,
                cache_read: 0.2,
                cache_write: 0.0,
                over_200k: None,
            },
            ModelLimit {
                context: 1_000_000,
                output: 65_536,
            },
        )],
    )
}

fn bedrock() -> Provider {
    provider(
        "amazon-bedrock",
        "Amazon Bedrock",
        API_BEDROCK,
        &["AWS_BEARER_TOKEN_BEDROCK", "AWS_ACCESS_KEY_ID", "AWS_PROFILE"],
        None,
        vec![
            model(
                "anthropic.claude-sonnet-4-5",
                "amazon-bedrock",
                "Claude Sonnet 4.5 (Bedrock)",
                "claude-sonnet-4",
                frontier_caps(),
                ModelCost {
                    input: 3.0,
                    output: 15.0,
                    cache_read: 0.3,
                    cache_write: 3.75,
                    over_200k: None,
                },
                ModelLimit {
                    context: 200_000,
                    output: 64_000,
                },
            ),
            model(
                "anthropic.claude-haiku-4-5",
                "amazon-bedrock",
                "Claude Haiku 4.5 (Bedrock)",
                "claude-haiku-4",
                frontier_caps(),
                ModelCost {
                    input: 1.0,
                    output: 5.0,
                    cache_read: 0.1,
                    cache_write: 1.25,
                    over_200k: None,
                },
                ModelLimit {
                    context: 200_000,
                    output: 64_000,
                },
            ),
        ],
    )
}

fn azure() -> Provider {
    provider(
        "azure",
        "Azure OpenAI",
        API_OPENAI_COMPATIBLE,
        &["AZURE_OPENAI_API_KEY", "AZURE_COGNITIVE_SERVICES_RESOURCE_NAME"],
        None,
        vec![model(
            "gpt-5",
            "azure",
            "GPT-5 (Azure)",
            "gpt-5",
            frontier_caps(),
            ModelCost {
                input: 2.5,
                output: 10.0,
                cache_read: 1.25,
                cache_write: 0.0,
                over_200k: None,
            },
            ModelLimit {
                context: 256_000,
                output: 32_768,
            },
        )],
    )
}

fn cloudflare_gateway() -> Provider {
    provider(
        "cloudflare-ai-gateway",
        "Cloudflare AI Gateway",
        API_OPENAI_COMPATIBLE,
        &[
            "CLOUDFLARE_API_TOKEN",
            "CLOUDFLARE_ACCOUNT_ID",
            "CLOUDFLARE_GATEWAY_ID",
        ],
        None,
        vec![model(
            "claude-sonnet-4-5",
            "cloudflare-ai-gateway",
            "Claude Sonnet 4.5 (Gateway)",
            "claude-sonnet-4",
            frontier_caps(),
            ModelCost {
                input: 3.0,
                output: 15.0,
                cache_read: 0.3,
                cache_write: 3.75,
                over_200k: None,
            },
            ModelLimit {
                context: 200_000,
                output: 64_000,
            },
        )],
    )
}

fn sap_ai_core() -> Provider {
    provider(
        "sap-ai-core",
        "SAP AI Core",
        API_OPENAI_COMPATIBLE,
        &[
            "AICORE_SERVICE_KEY",
            "AICORE_DEPLOYMENT_ID",
            "AICORE_RESOURCE_GROUP",
        ],
        None,
        vec![model(
            "gpt-5",
            "sap-ai-core",
            "GPT-5 (AI Core)",
            "gpt-5",
            frontier_caps(),
            ModelCost {
                input: 2.5,
                output: 10.0,
                cache_read: 0.0,
                cache_write: 0.0,
                over_200k: None,
            },
            ModelLimit {
                context: 256_000,
                output: 32_768,
            },
        )],
    )
}

fn github_copilot() -> Provider {
    provider(
        "github-copilot",
        "GitHub Copilot",
        API_OPENAI_COMPATIBLE,
        &["GITHUB_TOKEN"],
        Some("https://api.githubcopilot.com"),
        vec![
            model(
                "gpt-5-mini",
                "github-copilot",
                "GPT-5 mini (Copilot)",
                "gpt-5",
                text_caps(),
                ModelCost::default(),
                ModelLimit {
                    context: 128_000,
                    output: 16_384,
                },
            ),
            model(
                "claude-haiku-4-5",
                "github-copilot",
                "Claude Haiku 4.5 (Copilot)",
                "claude-haiku-4",
                text_caps(),
                ModelCost::default(),
                ModelLimit {
                    context: 200_000,
                    output: 16_384,
                },
            ),
        ],
    )
}

fn opencode() -> Provider {
    provider(
        "opencode",
        "opencode",
        API_OPENAI_COMPATIBLE,
        &["OPENCODE_API_KEY"],
        Some("https://opencode.ai/zen/v1"),
        vec![
            model(
                "gpt-5-nano",
                "opencode",
                "GPT-5 nano (zen)",
                "gpt-5",
                text_caps(),
                ModelCost::default(),
                ModelLimit {
                    context: 128_000,
                    output: 16_384,
                },
            ),
            model(
                "claude-sonnet-4-5",
                "opencode",
                "Claude Sonnet 4.5 (zen)",
                "claude-sonnet-4",
                frontier_caps(),
                ModelCost::default(),
                ModelLimit {
                    context: 200_000,
                    output: 64_000,
                },
            ),
        ],
    )
}

fn groq() -> Provider {
    provider(
        "groq",
        "Groq",
        API_OPENAI_COMPATIBLE,
        &["GROQ_API_KEY"],
        Some("https://api.groq.com/openai/v1"),
        vec![model(
            "llama-3.3-70b-versatile",
            "groq",
            "Llama 3.3 70B",
            "llama-3",
            text_caps(),
            ModelCost {
                input: 0.59,
                output: 0.79,
                cache_read: 0.0,
                cache_write: 0.0,
                over_200k: None,
            },
            ModelLimit {
                context: 128_000,
                output: 32_768,
            },
        )],
    )
}

fn mistral() -> Provider {
    provider(
        "mistral",
        "Mistral",
        API_OPENAI_COMPATIBLE,
        &["MISTRAL_API_KEY"],
        Some("https://api.mistral.ai/v1"),
        vec![model(
            "mistral-large-latest",
            "mistral",
            "Mistral Large",
            "mistral-large",
            text_caps(),
            ModelCost {
                input: 2.0,
                output: 6.0,
                cache_read: 0.0,
                cache_write: 0.0,
                over_200k: None,
            },
            ModelLimit {
                context: 128_000,
                output: 16_384,
            },
        )],
    )
}

fn xai() -> Provider {
    provider(
        "xai",
        "xAI",
        API_OPENAI_COMPATIBLE,
        &["XAI_API_KEY"],
        Some("https://api.x.ai/v1"),
        vec![model(
            "grok-4",
            "xai",
            "Grok 4",
            "grok-4",
            frontier_caps(),
            ModelCost {
                input: 3.0,
                output: 15.0,
                cache_read: 0.75,
                cache_write: 0.0,
                over_200k: None,
            },
            ModelLimit {
                context: 256_000,
                output: 32_768,
            },
        )],
    )
}

fn deepseek() -> Provider {
    provider(
        "deepseek",
        "DeepSeek",
        API_OPENAI_COMPATIBLE,
        &["DEEPSEEK_API_KEY"],
        Some("https://api.deepseek.com/v1"),
        vec![model(
            "deepseek-chat",
            "deepseek",
            "DeepSeek V3",
            "deepseek-v3",
            text_caps(),
            ModelCost {
                input: 0.27,
                output: 1.1,
                cache_read: 0.07,
                cache_write: 0.0,
                over_200k: None,
            },
            ModelLimit {
                context: 64_000,
                output: 8_192,
            },
        )],
    )
}

fn ollama() -> Provider {
    let mut caps = text_caps();
    // Local models advertise no native tool support; the prompt shim is
    // the route in when the user opts into prompt-mode tool calling.
    caps.tool_call = false;
    provider(
        "ollama",
        "Ollama",
        API_OLLAMA,
        &["OLLAMA_BASE_URL", "OLLAMA_HOST"],
        Some("http://127.0.0.1:11434"),
        vec![model(
            "llama3.1:8b-instruct",
            "ollama",
            "Llama 3.1 8B Instruct",
            "llama-3",
            caps,
            ModelCost::default(),
            ModelLimit {
                context: 16_384,
                output: 4_096,
            },
        )],
    )
}

fn owiseman() -> Provider {
    provider(
        "owiseman",
        "Owiseman",
        API_OWISEMAN,
        &["OWISEMAN_API_KEY", "OWISEMAN_BASE_URL"],
        None,
        vec![],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_catalog_shape() {
        let catalog = bundled();
        assert!(catalog.len() >= 15);
        assert!(catalog.contains_key("anthropic"));
        assert!(catalog.contains_key("openai"));
        assert!(catalog.contains_key("amazon-bedrock"));
        assert!(catalog.contains_key("ollama"));
        assert!(catalog.contains_key("owiseman"));
    }

    #[test]
    fn test_api_ids_default_to_model_ids() {
        for provider in bundled().values() {
            for model in provider.models.values() {
                assert!(!model.upstream_id().is_empty());
                assert_eq!(model.provider_id, provider.id);
            }
        }
    }

    #[test]
    fn test_env_var_lists() {
        let catalog = bundled();
        assert!(catalog["ollama"]
            .env
            .contains(&"OLLAMA_BASE_URL".to_string()));
        assert!(catalog["owiseman"]
            .env
            .contains(&"OWISEMAN_API_KEY".to_string()));
        assert!(catalog["amazon-bedrock"]
            .env
            .contains(&"AWS_BEARER_TOKEN_BEDROCK".to_string()));
        assert!(catalog["cloudflare-ai-gateway"]
            .env
            .contains(&"CLOUDFLARE_API_TOKEN".to_string()));
    }

    #[test]
    fn test_ollama_has_no_native_tools() {
        let catalog = bundled();
        let llama = &catalog["ollama"].models["llama3.1:8b-instruct"];
        assert!(!llama.capabilities.tool_call);
        assert_eq!(llama.limit.context, 16_384);
    }

    #[test]
    fn test_small_model_candidates_exist() {
        // The small-model policy's search names must resolve somewhere in
        // the bundled data.
        let catalog = bundled();
        assert!(catalog["anthropic"].models.contains_key("claude-haiku-4-5"));
        assert!(catalog["anthropic"].models.contains_key("claude-3-5-haiku"));
        assert!(catalog["google"].models.contains_key("gemini-3-flash"));
        assert!(catalog["google"].models.contains_key("gemini-2.5-flash"));
        assert!(catalog["openai"].models.contains_key("gpt-5-nano"));
        assert!(catalog["opencode"].models.contains_key("gpt-5-nano"));
        assert!(catalog["github-copilot"].models.contains_key("gpt-5-mini"));
    }
}
