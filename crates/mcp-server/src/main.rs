use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use slant::{
    ArticleRecord, BiasAnalyzer, EventArticleIndex, EventRecord, SourceTimeSeries,
    TemporalAnalyzer, DEFAULT_MIN_BURSTS,
};
use slant_reader::{StanceMap, UserVector};
use std::collections::BTreeMap;
use std::env;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const MAX_MESSAGE_BYTES: usize = 1_048_576; // 1 MiB
const MAX_ID_BYTES: usize = 512;
const MAX_RANK_K: usize = 200;
const MAX_ROLLING_WINDOW: usize = 1_000;

struct AppState {
    index: EventArticleIndex,
    profile: UserVector,
    bias: BiasAnalyzer,
    temporal: TemporalAnalyzer,
    index_path: PathBuf,
    profile_path: PathBuf,
}

impl AppState {
    fn open() -> Result<Self> {
        let index_path = PathBuf::from(
            env::var("SLANT_INDEX_PATH").unwrap_or_else(|_| "./slant-index.json".to_string()),
        );
        let profile_path = PathBuf::from(
            env::var("SLANT_PROFILE_PATH").unwrap_or_else(|_| "./slant-profile.json".to_string()),
        );
        let user_id = env::var("SLANT_USER_ID").unwrap_or_else(|_| "default".to_string());
        Self::open_at(index_path, profile_path, &user_id)
    }

    /// Load whatever already exists at the configured paths; start empty
    /// otherwise.
    fn open_at(index_path: PathBuf, profile_path: PathBuf, user_id: &str) -> Result<Self> {
        let index = if index_path.exists() {
            EventArticleIndex::load(&index_path)
                .with_context(|| format!("failed to load index from {}", index_path.display()))?
        } else {
            EventArticleIndex::new()
        };
        let profile = if profile_path.exists() {
            UserVector::load(&profile_path).with_context(|| {
                format!("failed to load profile from {}", profile_path.display())
            })?
        } else {
            UserVector::new(user_id)
        };
        tracing::info!(
            events = index.event_count(),
            articles = index.article_count(),
            user_id = profile.user_id(),
            "slant state ready"
        );
        Ok(Self {
            index,
            profile,
            bias: BiasAnalyzer::new(),
            temporal: TemporalAnalyzer::new(),
            index_path,
            profile_path,
        })
    }

    fn save(&self) -> Result<()> {
        self.index
            .save(&self.index_path)
            .with_context(|| format!("failed to save index to {}", self.index_path.display()))?;
        self.profile.save(&self.profile_path).with_context(|| {
            format!("failed to save profile to {}", self.profile_path.display())
        })?;
        Ok(())
    }

    fn series_for(&self, source: &str) -> Result<SourceTimeSeries> {
        let mut all = self.temporal.build_source_series(&self.index, &self.bias)?;
        Ok(all
            .remove(source)
            .unwrap_or_else(|| SourceTimeSeries::new(source)))
    }
}

fn main() -> Result<()> {
    // stdout carries the protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let mut state = AppState::open().context("failed to open slant state")?;
    let stdin = io::stdin();
    let mut reader = BufReader::new(stdin.lock());
    let stdout = io::stdout();
    let mut writer = stdout.lock();

    loop {
        let maybe = match read_message(&mut reader) {
            Ok(m) => m,
            Err(e) => {
                // Bad framing gets a JSON-RPC parse error (-32700); keep reading.
                tracing::warn!(error = %e, "rejecting malformed frame");
                let err_resp = json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": { "code": -32700, "message": format!("Parse error: {e}") }
                });
                write_message(&mut writer, &err_resp)?;
                continue;
            }
        };
        let Some(request) = maybe else {
            break;
        };
        if let Some(response) = handle_request(&mut state, &request) {
            write_message(&mut writer, &response)?;
        }
    }

    Ok(())
}

fn read_message<R: BufRead>(reader: &mut R) -> Result<Option<JsonValue>> {
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }

        if let Some((name, value)) = trimmed.split_once(':') {
            if name.eq_ignore_ascii_case("Content-Length") {
                content_length = Some(
                    value
                        .trim()
                        .parse::<usize>()
                        .context("invalid Content-Length")?,
                );
            }
        }
    }

    let len = content_length.context("missing Content-Length header")?;
    if len > MAX_MESSAGE_BYTES {
        anyhow::bail!(
            "Content-Length {} exceeds max allowed {} bytes",
            len,
            MAX_MESSAGE_BYTES
        );
    }
    let mut payload = vec![0_u8; len];
    reader.read_exact(&mut payload)?;
    let value: JsonValue = serde_json::from_slice(&payload).context("invalid JSON payload")?;
    Ok(Some(value))
}

fn write_message<W: Write>(writer: &mut W, value: &JsonValue) -> Result<()> {
    let payload = serde_json::to_vec(value)?;
    write!(writer, "Content-Length: {}\r\n\r\n", payload.len())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

fn handle_request(state: &mut AppState, req: &JsonValue) -> Option<JsonValue> {
    let id = req.get("id").cloned();
    let method = req.get("method").and_then(JsonValue::as_str)?;

    match method {
        "initialize" => id.map(|id_val| {
            json!({
                "jsonrpc": "2.0",
                "id": id_val,
                "result": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": "slant-mcp", "version": env!("CARGO_PKG_VERSION") }
                }
            })
        }),
        "notifications/initialized" => None,
        "tools/list" => id.map(|id_val| {
            json!({
                "jsonrpc": "2.0",
                "id": id_val,
                "result": {
                    "tools": tools_schema()
                }
            })
        }),
        "tools/call" => id.map(|id_val| {
            let result = call_tool(state, req.get("params"));
            match result {
                Ok(tool_result) => json!({
                    "jsonrpc": "2.0",
                    "id": id_val,
                    "result": tool_result
                }),
                Err(err) => {
                    tracing::warn!(error = %err, "tool call failed");
                    json!({
                        "jsonrpc": "2.0",
                        "id": id_val,
                        "result": {
                            "content": [{ "type": "text", "text": format!("tool error: {err:#}") }],
                            "isError": true
                        }
                    })
                }
            }
        }),
        "ping" => id.map(|id_val| json!({ "jsonrpc": "2.0", "id": id_val, "result": {} })),
        _ => id.map(|id_val| {
            json!({
                "jsonrpc": "2.0",
                "id": id_val,
                "error": {
                    "code": -32601,
                    "message": format!("method not found: {method}")
                }
            })
        }),
    }
}

fn tools_schema() -> Vec<JsonValue> {
    let event_id_only = json!({
        "type": "object",
        "properties": { "event_id": {"type": "string"} },
        "required": ["event_id"]
    });
    let stance_feedback = json!({
        "type": "object",
        "properties": {
            "stances": {"type": "object", "additionalProperties": {"type": "number"}},
            "strength": {"type": "number", "minimum": 0, "maximum": 1}
        },
        "required": ["stances"]
    });
    vec![
        json!({
            "name": "add_event",
            "description": "Insert or replace an event record.",
            "inputSchema": {
                "type": "object",
                "properties": { "event": {"type": "object"} },
                "required": ["event"]
            }
        }),
        json!({
            "name": "add_article",
            "description": "Insert or replace an article record and link its events.",
            "inputSchema": {
                "type": "object",
                "properties": { "article": {"type": "object"} },
                "required": ["article"]
            }
        }),
        json!({
            "name": "link_article",
            "description": "Link an article to an event, creating the event if unknown.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "article_id": {"type": "string"},
                    "event_id": {"type": "string"}
                },
                "required": ["article_id", "event_id"]
            }
        }),
        json!({
            "name": "event_bias",
            "description": "Centroid, per-article deviations and per-source fingerprint for an event.",
            "inputSchema": event_id_only
        }),
        json!({
            "name": "flag_rumors",
            "description": "Articles deviating from the event consensus by more than a threshold.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "event_id": {"type": "string"},
                    "threshold": {"type": "number"}
                },
                "required": ["event_id", "threshold"]
            }
        }),
        json!({
            "name": "source_series",
            "description": "Per-source deviation time series, optionally for one source.",
            "inputSchema": {
                "type": "object",
                "properties": { "source": {"type": "string"} }
            }
        }),
        json!({
            "name": "narrative_drift",
            "description": "Drift between consecutive samples of one source, optionally smoothed.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "source": {"type": "string"},
                    "rolling_window": {"type": "integer", "minimum": 1, "maximum": MAX_ROLLING_WINDOW}
                },
                "required": ["source"]
            }
        }),
        json!({
            "name": "burst_windows",
            "description": "Clusters of high-deviation samples from one source.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "source": {"type": "string"},
                    "threshold": {"type": "number"},
                    "window_seconds": {"type": "number", "minimum": 0},
                    "min_bursts": {"type": "integer", "minimum": 1}
                },
                "required": ["source", "threshold", "window_seconds"]
            }
        }),
        json!({
            "name": "like",
            "description": "Record that the reader liked an article with the given stances.",
            "inputSchema": stance_feedback.clone()
        }),
        json!({
            "name": "dislike",
            "description": "Record that the reader disliked an article with the given stances.",
            "inputSchema": stance_feedback
        }),
        json!({
            "name": "rank_articles",
            "description": "Closest and farthest articles to the reader's stances.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "articles": {},
                    "k": {"type": "integer", "minimum": 1, "maximum": MAX_RANK_K},
                    "closest": {"type": "boolean"},
                    "farthest": {"type": "boolean"}
                },
                "required": ["articles", "k"]
            }
        }),
        json!({
            "name": "save",
            "description": "Write the index snapshot and reader profile to disk.",
            "inputSchema": { "type": "object", "properties": {} }
        }),
    ]
}

/// Stance maps to rank, keyed by article id or listed by position.
#[derive(Deserialize)]
#[serde(untagged)]
enum RankInput {
    Keyed(BTreeMap<String, StanceMap>),
    Listed(Vec<StanceMap>),
}

fn call_tool(state: &mut AppState, params: Option<&JsonValue>) -> Result<JsonValue> {
    let name = params
        .and_then(|v| v.get("name"))
        .and_then(JsonValue::as_str)
        .context("missing tool name")?;
    let args = params
        .and_then(|v| v.get("arguments"))
        .cloned()
        .unwrap_or_else(|| json!({}));

    tracing::debug!(tool = name, "calling tool");
    match name {
        "add_event" => {
            let event: EventRecord = serde_json::from_value(
                args.get("event").cloned().context("event is required")?,
            )
            .context("event is not a valid event record")?;
            check_id("event_id", &event.event_id)?;
            let event_id = event.event_id.clone();
            state.index.add_event(event);
            Ok(json!({
                "content": [{ "type": "text", "text": format!("stored event {event_id}") }],
                "structuredContent": { "event_id": event_id }
            }))
        }
        "add_article" => {
            let article: ArticleRecord = serde_json::from_value(
                args.get("article").cloned().context("article is required")?,
            )
            .context("article is not a valid article record")?;
            check_id("article_id", &article.article_id)?;
            for event_id in &article.event_ids {
                check_id("event_id", event_id)?;
            }
            let article_id = article.article_id.clone();
            state.index.add_article(article);
            let event_ids = state.index.event_ids_for_article(&article_id).to_vec();
            Ok(json!({
                "content": [{ "type": "text", "text": format!("stored article {article_id}") }],
                "structuredContent": { "article_id": article_id, "event_ids": event_ids }
            }))
        }
        "link_article" => {
            let article_id = required_id(&args, "article_id")?;
            let event_id = required_id(&args, "event_id")?;
            state.index.link_article_to_event(article_id, event_id);
            Ok(json!({
                "content": [{ "type": "text", "text": format!("linked {article_id} -> {event_id}") }],
                "structuredContent": {
                    "article_id": article_id,
                    "event_ids": state.index.event_ids_for_article(article_id)
                }
            }))
        }
        "event_bias" => {
            let event_id = required_id(&args, "event_id")?;
            let centroid = state.bias.compute_event_centroid(&state.index, event_id)?;
            let deviations = state.bias.deviations_for_event(&state.index, event_id)?;
            let fingerprint = state.bias.source_bias_fingerprint(&state.index, event_id)?;
            Ok(json!({
                "content": [{ "type": "text", "text": format!(
                    "{} deviation(s) across {} source(s) for {event_id}",
                    deviations.len(),
                    fingerprint.len()
                ) }],
                "structuredContent": {
                    "centroid": centroid,
                    "deviations": deviations,
                    "fingerprint": fingerprint
                }
            }))
        }
        "flag_rumors" => {
            let event_id = required_id(&args, "event_id")?;
            let threshold = args
                .get("threshold")
                .and_then(JsonValue::as_f64)
                .context("threshold is required")?;
            let flagged = state.bias.flag_rumors(&state.index, event_id, threshold)?;
            Ok(json!({
                "content": [{ "type": "text", "text": format!("flagged {} article(s)", flagged.len()) }],
                "structuredContent": { "article_ids": flagged }
            }))
        }
        "source_series" => {
            let mut series = state
                .temporal
                .build_source_series(&state.index, &state.bias)?;
            if let Some(source) = args.get("source").and_then(JsonValue::as_str) {
                series.retain(|name, _| name == source);
            }
            Ok(json!({
                "content": [{ "type": "text", "text": format!("{} source series", series.len()) }],
                "structuredContent": { "series": series }
            }))
        }
        "narrative_drift" => {
            let source = required_id(&args, "source")?;
            let rolling_window = args
                .get("rolling_window")
                .and_then(JsonValue::as_u64)
                .map(|w| w as usize);
            if let Some(w) = rolling_window {
                if w > MAX_ROLLING_WINDOW {
                    anyhow::bail!("rolling_window exceeds max allowed value ({MAX_ROLLING_WINDOW})");
                }
            }
            let series = state.series_for(source)?;
            let drift = state.temporal.narrative_drift(&series);
            let smoothed = rolling_window.map(|w| state.temporal.rolling_average(&drift, w));
            Ok(json!({
                "content": [{ "type": "text", "text": format!("{} drift point(s) for {source}", drift.len()) }],
                "structuredContent": { "drift": drift, "rolling_average": smoothed }
            }))
        }
        "burst_windows" => {
            let source = required_id(&args, "source")?;
            let threshold = args
                .get("threshold")
                .and_then(JsonValue::as_f64)
                .context("threshold is required")?;
            let window_seconds = args
                .get("window_seconds")
                .and_then(JsonValue::as_f64)
                .context("window_seconds is required")?;
            if window_seconds < 0.0 {
                anyhow::bail!("window_seconds must not be negative");
            }
            let min_bursts = args
                .get("min_bursts")
                .and_then(JsonValue::as_u64)
                .map_or(DEFAULT_MIN_BURSTS, |m| m as usize);
            let series = state.series_for(source)?;
            let windows = state.temporal.repetitive_burst_windows(
                &series.points,
                threshold,
                window_seconds,
                min_bursts,
            );
            Ok(json!({
                "content": [{ "type": "text", "text": format!("{} burst window(s) for {source}", windows.len()) }],
                "structuredContent": { "windows": windows }
            }))
        }
        "like" | "dislike" => {
            let stances: StanceMap = serde_json::from_value(
                args.get("stances").cloned().context("stances is required")?,
            )
            .context("stances must map entity names to numbers")?;
            let strength = args.get("strength").and_then(JsonValue::as_f64);
            if name == "like" {
                state.profile.like(&stances, strength);
            } else {
                state.profile.dislike(&stances, strength);
            }
            Ok(json!({
                "content": [{ "type": "text", "text": format!(
                    "{name} recorded; {} engagement(s) so far",
                    state.profile.n_articles_engaged()
                ) }],
                "structuredContent": { "profile": &state.profile }
            }))
        }
        "rank_articles" => {
            let input: RankInput = serde_json::from_value(
                args.get("articles").cloned().context("articles is required")?,
            )
            .context("articles must be an object or array of stance maps")?;
            let k = args
                .get("k")
                .and_then(JsonValue::as_u64)
                .context("k is required")? as usize;
            if k > MAX_RANK_K {
                anyhow::bail!("k exceeds max allowed value ({MAX_RANK_K})");
            }
            let closest = args.get("closest").and_then(JsonValue::as_bool).unwrap_or(true);
            let farthest = args.get("farthest").and_then(JsonValue::as_bool).unwrap_or(true);
            let ranked = match &input {
                RankInput::Keyed(m) => state.profile.top_k(m, k, closest, farthest),
                RankInput::Listed(v) => state.profile.top_k(v, k, closest, farthest),
            };
            Ok(json!({
                "content": [{ "type": "text", "text": format!("ranked for {}", state.profile.user_id()) }],
                "structuredContent": ranked
            }))
        }
        "save" => {
            state.save()?;
            Ok(json!({
                "content": [{ "type": "text", "text": format!(
                    "saved index to {} and profile to {}",
                    display(&state.index_path),
                    display(&state.profile_path)
                ) }],
                "structuredContent": {
                    "index_path": display(&state.index_path),
                    "profile_path": display(&state.profile_path)
                }
            }))
        }
        _ => anyhow::bail!("unknown tool: {name}"),
    }
}

fn required_id<'a>(args: &'a JsonValue, field: &str) -> Result<&'a str> {
    let value = args
        .get(field)
        .and_then(JsonValue::as_str)
        .with_context(|| format!("{field} is required"))?;
    check_id(field, value)?;
    Ok(value)
}

fn check_id(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        anyhow::bail!("{field} must not be empty");
    }
    if value.len() > MAX_ID_BYTES {
        anyhow::bail!("{field} exceeds max allowed size ({MAX_ID_BYTES} bytes)");
    }
    Ok(())
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
