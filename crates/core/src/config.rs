use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

/// Top-level application configuration.
///
/// Loaded in layers: built-in defaults, then an optional `leadbot.toml`,
/// then `LEADBOT_*` environment overrides, then validation.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bots: Vec<BotConfig>,
    pub openai: OpenAiConfig,
    pub crm: CrmConfig,
    pub operator: OperatorConfig,
    pub limits: LimitsConfig,
    pub storage: StorageConfig,
    pub texts: TextsConfig,
    pub logging: LoggingConfig,
}

/// One Telegram bot paired with the assistant that answers for it.
#[derive(Clone, Debug)]
pub struct BotConfig {
    pub token: SecretString,
    pub assistant_id: String,
}

impl BotConfig {
    /// Stable identifier for per-bot files and log fields.
    ///
    /// Telegram bot tokens have the shape `<numeric id>:<secret>`; the
    /// numeric prefix is not secret and survives token rotation.
    pub fn bot_id(&self) -> String {
        use secrecy::ExposeSecret;
        let token = self.token.expose_secret();
        token.split(':').next().unwrap_or(token).to_string()
    }
}

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub poll_interval_secs: u64,
    pub run_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CrmConfig {
    /// Lead-ingestion webhook. Leads are rejected locally when unset.
    pub webhook_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Chat that receives diagnostics and lead submission outcomes.
    pub chat_id: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct LimitsConfig {
    /// Global per-bot ceiling on answered messages per calendar day.
    pub daily_message_ceiling: u32,
    /// Quiet period before the inactivity nudge fires.
    pub inactivity_delay_secs: u64,
    /// How many previous questions go into the follow-up prompt.
    pub recent_history_limit: usize,
    /// Default region for phone parsing, ISO 3166-1 alpha-2.
    pub phone_region: String,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

/// Operator-editable message texts.
///
/// These mirror the `.env` contract the bot was originally deployed with;
/// every deployment overrides most of them.
#[derive(Clone, Debug)]
pub struct TextsConfig {
    pub start_message: String,
    pub start_sticker: Option<String>,
    pub help_message: String,
    pub error_message: String,
    /// Sentinel substring the assistant includes when the user agreed to a
    /// callback. Must survive sanitization, so keep it bracket-free.
    pub agreement_marker: String,
    pub callback_succeed: String,
    pub phone_request: String,
    pub summary_request: String,
    pub ready_to_buy_request: String,
    /// Sentinel substring in the ready-to-buy estimation answer.
    pub discount_marker: String,
    pub discount_user_message: String,
    pub discount_owner_message: String,
    pub promocode_details: String,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bots: Vec::new(),
            openai: OpenAiConfig {
                api_key: String::new().into(),
                base_url: "https://api.openai.com/v1".to_string(),
                poll_interval_secs: 1,
                run_timeout_secs: 120,
                request_timeout_secs: 30,
            },
            crm: CrmConfig { webhook_url: None },
            operator: OperatorConfig { chat_id: None },
            limits: LimitsConfig {
                daily_message_ceiling: 100,
                inactivity_delay_secs: 300,
                recent_history_limit: 10,
                phone_region: "RU".to_string(),
            },
            storage: StorageConfig { data_dir: PathBuf::from("data") },
            texts: TextsConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for TextsConfig {
    fn default() -> Self {
        Self {
            start_message: "Hello! I am the virtual assistant. Ask me anything about our \
                            products."
                .to_string(),
            start_sticker: None,
            help_message: "The assistant answers questions about our products. If you want us \
                           to contact you, just ask for a callback."
                .to_string(),
            error_message: "The assistant is unavailable right now. Our team is already \
                            working on bringing it back."
                .to_string(),
            agreement_marker: "we will contact you".to_string(),
            callback_succeed: "Thank you! We received your phone number and will call you back \
                               shortly."
                .to_string(),
            phone_request: "Please send a phone number we can reach you at.".to_string(),
            summary_request: "Summarize the following dialog for a sales manager in a few \
                              sentences:"
                .to_string(),
            ready_to_buy_request: "Review the dialog below and reply with READY_TO_BUY if the \
                                   customer looks ready to purchase, otherwise reply NOT_READY:"
                .to_string(),
            discount_marker: "READY_TO_BUY".to_string(),
            discount_user_message: "We have a special offer for you! Use this promo code on \
                                    your next order."
                .to_string(),
            discount_owner_message: "Inactivity nudge: a discount offer was sent to a \
                                     qualified user."
                .to_string(),
            promocode_details: String::new(),
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("leadbot.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(bots) = patch.bots {
            self.bots = bots
                .into_iter()
                .map(|bot| BotConfig {
                    token: secret_value(bot.token),
                    assistant_id: bot.assistant_id,
                })
                .collect();
        }

        if let Some(openai) = patch.openai {
            if let Some(api_key_value) = openai.api_key {
                self.openai.api_key = secret_value(api_key_value);
            }
            if let Some(base_url) = openai.base_url {
                self.openai.base_url = base_url;
            }
            if let Some(poll_interval_secs) = openai.poll_interval_secs {
                self.openai.poll_interval_secs = poll_interval_secs;
            }
            if let Some(run_timeout_secs) = openai.run_timeout_secs {
                self.openai.run_timeout_secs = run_timeout_secs;
            }
            if let Some(request_timeout_secs) = openai.request_timeout_secs {
                self.openai.request_timeout_secs = request_timeout_secs;
            }
        }

        if let Some(crm) = patch.crm {
            if let Some(webhook_url) = crm.webhook_url {
                self.crm.webhook_url = Some(webhook_url);
            }
        }

        if let Some(operator) = patch.operator {
            if let Some(chat_id) = operator.chat_id {
                self.operator.chat_id = Some(chat_id);
            }
        }

        if let Some(limits) = patch.limits {
            if let Some(daily_message_ceiling) = limits.daily_message_ceiling {
                self.limits.daily_message_ceiling = daily_message_ceiling;
            }
            if let Some(inactivity_delay_secs) = limits.inactivity_delay_secs {
                self.limits.inactivity_delay_secs = inactivity_delay_secs;
            }
            if let Some(recent_history_limit) = limits.recent_history_limit {
                self.limits.recent_history_limit = recent_history_limit;
            }
            if let Some(phone_region) = limits.phone_region {
                self.limits.phone_region = phone_region;
            }
        }

        if let Some(storage) = patch.storage {
            if let Some(data_dir) = storage.data_dir {
                self.storage.data_dir = data_dir;
            }
        }

        if let Some(texts) = patch.texts {
            apply_text_patch(&mut self.texts, texts);
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        // Comma-separated lists pair token N with assistant id N, exactly as
        // the original deployment's .env files did.
        let tokens = read_env("LEADBOT_BOT_TOKENS").map(|value| split_env_list(&value));
        let assistant_ids = read_env("LEADBOT_ASSISTANT_IDS").map(|value| split_env_list(&value));
        match (tokens, assistant_ids) {
            (Some(tokens), Some(assistant_ids)) => {
                if tokens.len() != assistant_ids.len() {
                    return Err(ConfigError::Validation(format!(
                        "LEADBOT_BOT_TOKENS has {} entries but LEADBOT_ASSISTANT_IDS has {}",
                        tokens.len(),
                        assistant_ids.len()
                    )));
                }
                self.bots = tokens
                    .into_iter()
                    .zip(assistant_ids)
                    .map(|(token, assistant_id)| BotConfig {
                        token: secret_value(token),
                        assistant_id,
                    })
                    .collect();
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(ConfigError::Validation(
                    "LEADBOT_BOT_TOKENS and LEADBOT_ASSISTANT_IDS must be set together"
                        .to_string(),
                ));
            }
            (None, None) => {}
        }

        if let Some(value) = read_env("LEADBOT_OPENAI_API_KEY") {
            self.openai.api_key = secret_value(value);
        }
        if let Some(value) = read_env("LEADBOT_OPENAI_BASE_URL") {
            self.openai.base_url = value;
        }
        if let Some(value) = read_env("LEADBOT_CRM_WEBHOOK") {
            self.crm.webhook_url = Some(value);
        }
        if let Some(value) = read_env("LEADBOT_OWNER_CHAT_ID") {
            self.operator.chat_id = Some(parse_i64("LEADBOT_OWNER_CHAT_ID", &value)?);
        }
        if let Some(value) = read_env("LEADBOT_DAILY_MESSAGE_CEILING") {
            self.limits.daily_message_ceiling =
                parse_u32("LEADBOT_DAILY_MESSAGE_CEILING", &value)?;
        }
        if let Some(value) = read_env("LEADBOT_INACTIVITY_DELAY_SECS") {
            self.limits.inactivity_delay_secs =
                parse_u64("LEADBOT_INACTIVITY_DELAY_SECS", &value)?;
        }
        if let Some(value) = read_env("LEADBOT_PHONE_REGION") {
            self.limits.phone_region = value;
        }
        if let Some(value) = read_env("LEADBOT_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(value);
        }

        if let Some(value) = read_env("LEADBOT_START_MESSAGE") {
            self.texts.start_message = value;
        }
        if let Some(value) = read_env("LEADBOT_START_STICKER") {
            self.texts.start_sticker = Some(value);
        }
        if let Some(value) = read_env("LEADBOT_HELP_MESSAGE") {
            self.texts.help_message = value;
        }
        if let Some(value) = read_env("LEADBOT_ERROR_MESSAGE") {
            self.texts.error_message = value;
        }
        if let Some(value) = read_env("LEADBOT_AGREEMENT_MARKER") {
            self.texts.agreement_marker = value;
        }
        if let Some(value) = read_env("LEADBOT_CALLBACK_SUCCEED") {
            self.texts.callback_succeed = value;
        }
        if let Some(value) = read_env("LEADBOT_PHONE_REQUEST") {
            self.texts.phone_request = value;
        }
        if let Some(value) = read_env("LEADBOT_SUMMARY_REQUEST") {
            self.texts.summary_request = value;
        }
        if let Some(value) = read_env("LEADBOT_READY_TO_BUY_REQUEST") {
            self.texts.ready_to_buy_request = value;
        }
        if let Some(value) = read_env("LEADBOT_DISCOUNT_MARKER") {
            self.texts.discount_marker = value;
        }
        if let Some(value) = read_env("LEADBOT_DISCOUNT_USER_MESSAGE") {
            self.texts.discount_user_message = value;
        }
        if let Some(value) = read_env("LEADBOT_DISCOUNT_OWNER_MESSAGE") {
            self.texts.discount_owner_message = value;
        }
        if let Some(value) = read_env("LEADBOT_PROMOCODE_DETAILS") {
            self.texts.promocode_details = value;
        }

        let log_level = read_env("LEADBOT_LOGGING_LEVEL").or_else(|| read_env("LEADBOT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("LEADBOT_LOGGING_FORMAT").or_else(|| read_env("LEADBOT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.bots.is_empty() {
            return Err(ConfigError::Validation(
                "at least one bot must be configured (bots in leadbot.toml or \
                 LEADBOT_BOT_TOKENS/LEADBOT_ASSISTANT_IDS)"
                    .to_string(),
            ));
        }
        for (index, bot) in self.bots.iter().enumerate() {
            use secrecy::ExposeSecret;
            if bot.token.expose_secret().is_empty() {
                return Err(ConfigError::Validation(format!("bots[{index}].token is empty")));
            }
            if bot.assistant_id.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "bots[{index}].assistant_id is empty"
                )));
            }
        }
        if self.limits.daily_message_ceiling == 0 {
            return Err(ConfigError::Validation(
                "limits.daily_message_ceiling must be at least 1".to_string(),
            ));
        }
        if self.limits.recent_history_limit == 0 {
            return Err(ConfigError::Validation(
                "limits.recent_history_limit must be at least 1".to_string(),
            ));
        }
        if self.limits.phone_region.len() != 2 {
            return Err(ConfigError::Validation(format!(
                "limits.phone_region must be a two-letter region code, got `{}`",
                self.limits.phone_region
            )));
        }
        if self.texts.agreement_marker.trim().is_empty() {
            return Err(ConfigError::Validation(
                "texts.agreement_marker must not be blank".to_string(),
            ));
        }
        Ok(())
    }
}

/// Splits a comma-separated env value, dropping blank entries.
pub fn split_env_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

fn resolve_config_path(requested: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = requested {
        return Some(path.to_path_buf());
    }
    let default = PathBuf::from("leadbot.toml");
    default.is_file().then_some(default)
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    toml::from_str(&raw)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn apply_text_patch(texts: &mut TextsConfig, patch: TextsPatch) {
    if let Some(start_message) = patch.start_message {
        texts.start_message = start_message;
    }
    if let Some(start_sticker) = patch.start_sticker {
        texts.start_sticker = Some(start_sticker);
    }
    if let Some(help_message) = patch.help_message {
        texts.help_message = help_message;
    }
    if let Some(error_message) = patch.error_message {
        texts.error_message = error_message;
    }
    if let Some(agreement_marker) = patch.agreement_marker {
        texts.agreement_marker = agreement_marker;
    }
    if let Some(callback_succeed) = patch.callback_succeed {
        texts.callback_succeed = callback_succeed;
    }
    if let Some(phone_request) = patch.phone_request {
        texts.phone_request = phone_request;
    }
    if let Some(summary_request) = patch.summary_request {
        texts.summary_request = summary_request;
    }
    if let Some(ready_to_buy_request) = patch.ready_to_buy_request {
        texts.ready_to_buy_request = ready_to_buy_request;
    }
    if let Some(discount_marker) = patch.discount_marker {
        texts.discount_marker = discount_marker;
    }
    if let Some(discount_user_message) = patch.discount_user_message {
        texts.discount_user_message = discount_user_message;
    }
    if let Some(discount_owner_message) = patch.discount_owner_message {
        texts.discount_owner_message = discount_owner_message;
    }
    if let Some(promocode_details) = patch.promocode_details {
        texts.promocode_details = promocode_details;
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    bots: Option<Vec<BotPatch>>,
    openai: Option<OpenAiPatch>,
    crm: Option<CrmPatch>,
    operator: Option<OperatorPatch>,
    limits: Option<LimitsPatch>,
    storage: Option<StoragePatch>,
    texts: Option<TextsPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Deserialize)]
struct BotPatch {
    token: String,
    assistant_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    poll_interval_secs: Option<u64>,
    run_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CrmPatch {
    webhook_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OperatorPatch {
    chat_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct LimitsPatch {
    daily_message_ceiling: Option<u32>,
    inactivity_delay_secs: Option<u64>,
    recent_history_limit: Option<usize>,
    phone_region: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StoragePatch {
    data_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct TextsPatch {
    start_message: Option<String>,
    start_sticker: Option<String>,
    help_message: Option<String>,
    error_message: Option<String>,
    agreement_marker: Option<String>,
    callback_succeed: Option<String>,
    phone_request: Option<String>,
    summary_request: Option<String>,
    ready_to_buy_request: Option<String>,
    discount_marker: Option<String>,
    discount_user_message: Option<String>,
    discount_owner_message: Option<String>,
    promocode_details: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
