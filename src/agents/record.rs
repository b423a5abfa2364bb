//! 原始记录 → 强类型配置的唯一转换步骤
//!
//! 后端存储丢失了静态类型：同一个数字可能是小整数、64 位整数、浮点数，甚至是字符串。
//! 这里统一宽松解析，缺失或无法解析时回退到文档化的默认值。

use serde_json::{Map, Value};

use crate::agents::config::{
    AgentSessionConfig, CapabilityFlags, ModelReference, SamplingParams, ThinkingEffort,
    DEFAULT_MAX_RECURSIONS, DEFAULT_TEMPERATURE, DEFAULT_TOP_P,
};

/// 未定型的记录（agent 或 model）
pub type RawRecord = Map<String, Value>;

pub fn coerce_f64(value: Option<&Value>) -> Option<f64> {
    let f = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    f.is_finite().then_some(f)
}

pub fn coerce_i64(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
            .or_else(|| n.as_f64().and_then(integral_f64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral_f64))
        }
        _ => None,
    }
}

fn integral_f64(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64)
        .then_some(f as i64)
}

/// 正整数（u32 范围内）；0 或负数视为无效
pub fn coerce_positive_u32(value: Option<&Value>) -> Option<u32> {
    coerce_i64(value)
        .filter(|n| *n > 0)
        .and_then(|n| u32::try_from(n).ok())
}

pub fn string_field(record: &RawRecord, key: &str) -> Option<String> {
    record
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// 字符串列表：数组或逗号分隔字符串；去重并保留首次出现的顺序
pub fn string_list(record: &RawRecord, key: &str) -> Vec<String> {
    let raw: Vec<String> = match record.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .collect(),
        Some(Value::String(s)) => s.split(',').map(|p| p.trim().to_string()).collect(),
        _ => Vec::new(),
    };
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for item in raw {
        if !item.is_empty() && !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

/// 能力：`capabilities = ["delegation", ...]` 或 `capabilities = { delegation = true }`
pub fn capabilities(record: &RawRecord) -> CapabilityFlags {
    let mut flags = CapabilityFlags::default();
    let enabled: Vec<String> = match record.get("capabilities") {
        Some(Value::Object(table)) => table
            .iter()
            .filter(|(_, v)| v.as_bool().unwrap_or(false))
            .map(|(k, _)| k.clone())
            .collect(),
        Some(_) => string_list(record, "capabilities"),
        None => Vec::new(),
    };
    for name in enabled {
        match name.to_ascii_lowercase().replace('-', "_").as_str() {
            "delegation" | "delegate" | "subagents" => flags.delegation = true,
            "memory_injection" | "memory" => flags.memory_injection = true,
            "markdown" | "markdown_rendering" => flags.markdown = true,
            other => tracing::warn!(capability = %other, "ignoring unknown capability"),
        }
    }
    flags
}

pub fn sampling(record: &RawRecord) -> SamplingParams {
    SamplingParams {
        temperature: coerce_f64(record.get("temperature")).unwrap_or(DEFAULT_TEMPERATURE),
        top_p: coerce_f64(record.get("top_p")).unwrap_or(DEFAULT_TOP_P),
        seed: coerce_i64(record.get("seed")),
    }
}

/// 由模型记录构建完整 ModelReference
pub fn model_from_record(name: &str, record: &RawRecord) -> ModelReference {
    ModelReference {
        name: string_field(record, "name").unwrap_or_else(|| name.to_string()),
        provider: string_field(record, "provider"),
        endpoint: string_field(record, "endpoint").or_else(|| string_field(record, "base_url")),
        credential: string_field(record, "credential").or_else(|| string_field(record, "api_key")),
        model_id: string_field(record, "model_id").or_else(|| string_field(record, "model")),
        sampling: sampling(record),
        resolved: true,
    }
}

/// 由 agent 记录与已解析的模型构建会话配置
pub fn session_config_from_record(
    name: &str,
    record: &RawRecord,
    model: ModelReference,
) -> AgentSessionConfig {
    let max_recursions = match coerce_positive_u32(record.get("max_recursions")) {
        Some(n) => n,
        None => {
            if record.contains_key("max_recursions") {
                tracing::warn!(agent = %name, "invalid max_recursions, using default");
            }
            DEFAULT_MAX_RECURSIONS
        }
    };
    let thinking_effort = match string_field(record, "thinking_effort") {
        Some(s) => ThinkingEffort::parse(&s).unwrap_or_else(|| {
            tracing::warn!(agent = %name, effort = %s, "unknown thinking effort, using off");
            ThinkingEffort::Off
        }),
        None => ThinkingEffort::Off,
    };
    AgentSessionConfig {
        name: name.to_string(),
        model,
        tools: string_list(record, "tools"),
        capabilities: capabilities(record),
        thinking_effort,
        template: string_field(record, "template"),
        system_prompt: string_field(record, "system_prompt"),
        max_recursions,
    }
}
