//! C8: the tool surface agents use to control other agents. Every tool is
//! an ordinary `AgentManager` operation (spec.md §4.8: "Tool invocations are
//! just ordinary C3 operations"); this module only does argument parsing and
//! response shaping.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use paseo_core::AgentManager;
use paseo_protocol::ids::AgentId;
use paseo_protocol::permission::PermissionBehavior;
use paseo_protocol::permission::PermissionResolution;
use paseo_protocol::timeline::Projection;
use paseo_mcp_types::CallToolResult;
use paseo_mcp_types::Tool;
use serde::Deserialize;
use serde_json::json;

/// The tools advertised by `tools/list`, in the order a reader would expect
/// to find them: inspect, then act.
pub fn catalog() -> Vec<Tool> {
    vec![
        Tool {
            name: "list_agents".into(),
            description: Some("List every managed agent, live or dormant.".into()),
            input_schema: json!({"type": "object", "properties": {}}),
        },
        Tool {
            name: "create_agent".into(),
            description: Some(
                "Start a new agent against a configured provider, rooted at a working directory."
                    .into(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "provider": {"type": "string"},
                    "cwd": {"type": "string"},
                    "config": {"type": "object"},
                    "callerAgentId": {"type": "string"},
                },
                "required": ["provider", "cwd"],
            }),
        },
        Tool {
            name: "send_agent_prompt".into(),
            description: Some("Send a user-authored message to an agent's active turn.".into()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "agentId": {"type": "string"},
                    "text": {"type": "string"},
                    "attachments": {"type": "array", "items": {"type": "string"}},
                },
                "required": ["agentId", "text"],
            }),
        },
        Tool {
            name: "get_agent_activity".into(),
            description: Some(
                "Curated, terse text rendering of an agent's recent timeline activity.".into(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "agentId": {"type": "string"},
                    "maxItems": {"type": "integer", "minimum": 1},
                },
                "required": ["agentId"],
            }),
        },
        Tool {
            name: "kill_agent".into(),
            description: Some(
                "Close an agent's provider conversation. Hard-deletes the registry record if `hard` is true.".into(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "agentId": {"type": "string"},
                    "hard": {"type": "boolean"},
                },
                "required": ["agentId"],
            }),
        },
        Tool {
            name: "set_agent_mode".into(),
            description: Some("Switch an agent's operating mode.".into()),
            input_schema: agent_selector_schema("modeId"),
        },
        Tool {
            name: "set_agent_model".into(),
            description: Some("Switch an agent's model.".into()),
            input_schema: agent_selector_schema("modelId"),
        },
        Tool {
            name: "set_agent_thinking_option".into(),
            description: Some("Switch an agent's thinking/reasoning option.".into()),
            input_schema: agent_selector_schema("thinkingOptionId"),
        },
        Tool {
            name: "set_agent_variant".into(),
            description: Some("Switch an agent's model variant.".into()),
            input_schema: agent_selector_schema("variantId"),
        },
        Tool {
            name: "resolve_agent_permission".into(),
            description: Some("Resolve a pending permission request raised by an agent.".into()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "agentId": {"type": "string"},
                    "requestId": {"type": "string"},
                    "behavior": {"type": "string", "enum": ["allow", "deny"]},
                    "optionId": {"type": "string"},
                    "message": {"type": "string"},
                },
                "required": ["agentId", "requestId", "behavior"],
            }),
        },
        Tool {
            name: "fetch_agent_timeline".into(),
            description: Some("Fetch a window of an agent's canonical or projected timeline.".into()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "agentId": {"type": "string"},
                    "from": {"type": "integer", "minimum": 1},
                    "to": {"type": "integer", "minimum": 1},
                    "projection": {"type": "string", "enum": ["canonical", "projected"]},
                },
                "required": ["agentId", "from", "to"],
            }),
        },
        Tool {
            name: "list_provider_models".into(),
            description: Some("List the models a configured provider currently offers.".into()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "provider": {"type": "string"},
                    "cwd": {"type": "string"},
                },
                "required": ["provider"],
            }),
        },
    ]
}

fn agent_selector_schema(value_field: &str) -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "agentId": {"type": "string"},
            value_field: {"type": "string"},
        },
        "required": ["agentId", value_field],
    })
}

/// Dispatch one `tools/call` to the matching `AgentManager` operation.
pub async fn call(manager: &Arc<AgentManager>, name: &str, arguments: serde_json::Value) -> CallToolResult {
    match dispatch(manager, name, arguments).await {
        Ok(result) => result,
        Err(err) => CallToolResult::error(err.to_string()),
    }
}

async fn dispatch(
    manager: &Arc<AgentManager>,
    name: &str,
    arguments: serde_json::Value,
) -> anyhow::Result<CallToolResult> {
    match name {
        "list_agents" => {
            let agents = manager.list_agents().await;
            Ok(CallToolResult::structured(serde_json::to_value(agents)?))
        }
        "create_agent" => {
            #[derive(Deserialize)]
            struct Args {
                provider: String,
                cwd: PathBuf,
                #[serde(default)]
                config: Option<serde_json::Value>,
                #[serde(rename = "callerAgentId", default)]
                caller_agent_id: Option<String>,
            }
            let args: Args = serde_json::from_value(arguments)?;
            let agent = manager.create_agent(&args.provider, args.cwd, args.config).await?;
            if let Some(caller) = args.caller_agent_id {
                manager.set_agent_label(agent.id, "parentAgentId", &caller).await?;
            }
            Ok(CallToolResult::structured(serde_json::to_value(agent)?))
        }
        "send_agent_prompt" => {
            #[derive(Deserialize)]
            struct Args {
                #[serde(rename = "agentId")]
                agent_id: String,
                text: String,
                #[serde(default)]
                attachments: Vec<String>,
            }
            let args: Args = serde_json::from_value(arguments)?;
            manager
                .send_message(parse_agent_id(&args.agent_id)?, &args.text, &args.attachments)
                .await?;
            Ok(CallToolResult::text("ok"))
        }
        "get_agent_activity" => {
            #[derive(Deserialize)]
            struct Args {
                #[serde(rename = "agentId")]
                agent_id: String,
                #[serde(rename = "maxItems", default = "default_max_items")]
                max_items: usize,
            }
            let args: Args = serde_json::from_value(arguments)?;
            let lines = manager
                .curated_activity(parse_agent_id(&args.agent_id)?, args.max_items)
                .await?;
            Ok(CallToolResult::text(lines.join("\n")))
        }
        "kill_agent" => {
            #[derive(Deserialize)]
            struct Args {
                #[serde(rename = "agentId")]
                agent_id: String,
                #[serde(default)]
                hard: bool,
            }
            let args: Args = serde_json::from_value(arguments)?;
            manager.delete_agent(parse_agent_id(&args.agent_id)?, args.hard).await?;
            Ok(CallToolResult::text("ok"))
        }
        "set_agent_mode" => {
            let (agent_id, value) = parse_selector(arguments, "modeId")?;
            manager.set_agent_mode(agent_id, &value).await?;
            Ok(CallToolResult::text("ok"))
        }
        "set_agent_model" => {
            let (agent_id, value) = parse_selector(arguments, "modelId")?;
            manager.set_agent_model(agent_id, &value).await?;
            Ok(CallToolResult::text("ok"))
        }
        "set_agent_thinking_option" => {
            let (agent_id, value) = parse_selector(arguments, "thinkingOptionId")?;
            manager.set_agent_thinking(agent_id, &value).await?;
            Ok(CallToolResult::text("ok"))
        }
        "set_agent_variant" => {
            let (agent_id, value) = parse_selector(arguments, "variantId")?;
            manager.set_agent_variant(agent_id, &value).await?;
            Ok(CallToolResult::text("ok"))
        }
        "resolve_agent_permission" => {
            #[derive(Deserialize)]
            struct Args {
                #[serde(rename = "agentId")]
                agent_id: String,
                #[serde(rename = "requestId")]
                request_id: String,
                behavior: String,
                #[serde(rename = "optionId", default)]
                option_id: Option<String>,
                #[serde(default)]
                message: Option<String>,
            }
            let args: Args = serde_json::from_value(arguments)?;
            let behavior = match args.behavior.as_str() {
                "allow" => PermissionBehavior::Allow,
                "deny" => PermissionBehavior::Deny,
                other => anyhow::bail!("unknown permission behavior: {other}"),
            };
            manager
                .resolve_permission(
                    parse_agent_id(&args.agent_id)?,
                    &args.request_id,
                    PermissionResolution {
                        behavior,
                        option_id: args.option_id,
                        message: args.message,
                    },
                )
                .await?;
            Ok(CallToolResult::text("ok"))
        }
        "fetch_agent_timeline" => {
            #[derive(Deserialize)]
            struct Args {
                #[serde(rename = "agentId")]
                agent_id: String,
                from: u64,
                to: u64,
                #[serde(default)]
                projection: Option<String>,
            }
            let args: Args = serde_json::from_value(arguments)?;
            let projection = match args.projection.as_deref() {
                Some("projected") => Projection::Projected,
                _ => Projection::Canonical,
            };
            let (rows, projected) = manager
                .fetch_timeline(parse_agent_id(&args.agent_id)?, args.from, args.to, projection)
                .await?;
            Ok(CallToolResult::structured(json!({
                "rows": rows,
                "projected": projected,
            })))
        }
        "list_provider_models" => {
            #[derive(Deserialize)]
            struct Args {
                provider: String,
                #[serde(default)]
                cwd: Option<PathBuf>,
            }
            let args: Args = serde_json::from_value(arguments)?;
            let models = manager
                .list_provider_models(&args.provider, args.cwd.as_deref())
                .await?;
            Ok(CallToolResult::structured(serde_json::to_value(models)?))
        }
        other => anyhow::bail!("unknown tool: {other}"),
    }
}

fn default_max_items() -> usize {
    20
}

fn parse_agent_id(raw: &str) -> anyhow::Result<AgentId> {
    AgentId::from_str(raw).map_err(|err| anyhow::anyhow!("invalid agentId {raw:?}: {err}"))
}

fn parse_selector(arguments: serde_json::Value, value_field: &'static str) -> anyhow::Result<(AgentId, String)> {
    let agent_id = arguments
        .get("agentId")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("missing agentId"))?;
    let value = arguments
        .get(value_field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("missing {value_field}"))?;
    Ok((parse_agent_id(agent_id)?, value.to_string()))
}
