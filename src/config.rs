use crate::domain::MonitoredEntity;
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_WB_CATALOG_URL: &str =
    "https://static-basket-01.wb.ru/vol0/data/main-menu-ru-ru-v2.json";
pub const DEFAULT_WB_SEARCH_URL: &str =
    "https://search.wb.ru/exactmatch/ru/common/v4/search?appType=1&curr=rub&dest=-1257786&resultset=catalog";
pub const DEFAULT_WB_LISTING_URL: &str = "https://catalog.wb.ru/catalog";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub cycle_interval_secs: u64,
    pub max_concurrent_entities: usize,
    pub telegram_bot_token: Option<String>,
    pub admin_contacts: Vec<String>,
    pub subscriber_contacts: Vec<String>,
    pub entities: Vec<MonitoredEntity>,
    pub wb_catalog_url: String,
    pub wb_search_url: String,
    pub wb_listing_url: String,
    pub settings: Settings,
}

/// Monitor tunables. Built once at startup and shared by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Minutes between two error notifications for one entity.
    pub report_errors_delay_interval: i64,
    /// Minutes between two change notifications for one entity.
    pub report_changes_delay_interval: i64,
    pub max_matched_subcategories: usize,
    pub search_min_chars: usize,
    pub search_max_suffix: usize,
    pub http_retries: u32,
    /// Seconds.
    pub http_base_retry_pause: f64,
    pub products_num_pages_to_fetch: u32,
    pub products_num_to_determine_spp: usize,
    /// Percent, 0..=100.
    pub products_num_percent_min_determine_spp: u32,
    /// Percent cap, 0..=100.
    pub maximum_client_discount_base: u32,
    /// Indeterminate cycles in a row before an error is raised; 0 disables.
    pub indeterminate_error_cycles: u32,
    /// Days without a visit after which entity state is pruned; 0 disables.
    pub state_retention_days: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            report_errors_delay_interval: 120,
            report_changes_delay_interval: 60,
            max_matched_subcategories: 3,
            search_min_chars: 4,
            search_max_suffix: 2,
            http_retries: 3,
            http_base_retry_pause: 1.0,
            products_num_pages_to_fetch: 1,
            products_num_to_determine_spp: 12,
            products_num_percent_min_determine_spp: 75,
            maximum_client_discount_base: 30,
            indeterminate_error_cycles: 3,
            state_retention_days: 30,
        }
    }
}

impl Settings {
    /// Reject values outside a sane range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(key: &str, reason: &str) -> ConfigError {
            ConfigError::InvalidValue(key.to_string(), reason.to_string())
        }

        if self.report_errors_delay_interval < 0 {
            return Err(invalid("REPORT_ERRORS_DELAY_INTERVAL", "must not be negative"));
        }
        if self.report_changes_delay_interval < 0 {
            return Err(invalid("REPORT_CHANGES_DELAY_INTERVAL", "must not be negative"));
        }
        if self.max_matched_subcategories == 0 {
            return Err(invalid("MAX_MATCHED_SUBCATEGORIES", "must be at least 1"));
        }
        if self.search_min_chars == 0 {
            return Err(invalid("SEARCH_MIN_CHARS", "must be at least 1"));
        }
        if !self.http_base_retry_pause.is_finite()
            || !(0.0..=3600.0).contains(&self.http_base_retry_pause)
        {
            return Err(invalid(
                "HTTP_BASE_RETRY_PAUSE",
                "must be between 0 and 3600 seconds",
            ));
        }
        if self.products_num_pages_to_fetch == 0 {
            return Err(invalid("PRODUCTS_NUM_PAGES_TO_FETCH", "must be at least 1"));
        }
        if self.products_num_to_determine_spp == 0 {
            return Err(invalid("PRODUCTS_NUM_TO_DETERMINE_SPP", "must be at least 1"));
        }
        if self.products_num_percent_min_determine_spp > 100 {
            return Err(invalid(
                "PRODUCTS_NUM_PERCENT_MIN_DETERMINE_SPP",
                "must be between 0 and 100",
            ));
        }
        if self.maximum_client_discount_base > 100 {
            return Err(invalid(
                "MAXIMUM_CLIENT_DISCOUNT_BASE",
                "must be between 0 and 100",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_var(&env_map, "PORT", 8080u16)?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let cycle_interval_secs = parse_var(&env_map, "CYCLE_INTERVAL_SECS", 3600u64)?;
        if cycle_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "CYCLE_INTERVAL_SECS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let max_concurrent_entities = parse_var(&env_map, "MAX_CONCURRENT_ENTITIES", 4usize)?;
        if max_concurrent_entities == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_CONCURRENT_ENTITIES".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let telegram_bot_token = env_map
            .get("TELEGRAM_BOT_TOKEN")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let admin_contacts = read_contacts(&env_map, "CONTACTS_ADMINS_FILE")?;
        let subscriber_contacts = read_contacts(&env_map, "CONTACTS_USERS_FILE")?;
        let entities = parse_entities_from_map(&env_map)?;

        let url = |key: &str, default: &str| {
            env_map
                .get(key)
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };

        let defaults = Settings::default();
        let settings = Settings {
            report_errors_delay_interval: parse_var(
                &env_map,
                "REPORT_ERRORS_DELAY_INTERVAL",
                defaults.report_errors_delay_interval,
            )?,
            report_changes_delay_interval: parse_var(
                &env_map,
                "REPORT_CHANGES_DELAY_INTERVAL",
                defaults.report_changes_delay_interval,
            )?,
            max_matched_subcategories: parse_var(
                &env_map,
                "MAX_MATCHED_SUBCATEGORIES",
                defaults.max_matched_subcategories,
            )?,
            search_min_chars: parse_var(&env_map, "SEARCH_MIN_CHARS", defaults.search_min_chars)?,
            search_max_suffix: parse_var(
                &env_map,
                "SEARCH_MAX_SUFFIX",
                defaults.search_max_suffix,
            )?,
            http_retries: parse_var(&env_map, "HTTP_RETRIES", defaults.http_retries)?,
            http_base_retry_pause: parse_var(
                &env_map,
                "HTTP_BASE_RETRY_PAUSE",
                defaults.http_base_retry_pause,
            )?,
            products_num_pages_to_fetch: parse_var(
                &env_map,
                "PRODUCTS_NUM_PAGES_TO_FETCH",
                defaults.products_num_pages_to_fetch,
            )?,
            products_num_to_determine_spp: parse_var(
                &env_map,
                "PRODUCTS_NUM_TO_DETERMINE_SPP",
                defaults.products_num_to_determine_spp,
            )?,
            products_num_percent_min_determine_spp: parse_var(
                &env_map,
                "PRODUCTS_NUM_PERCENT_MIN_DETERMINE_SPP",
                defaults.products_num_percent_min_determine_spp,
            )?,
            maximum_client_discount_base: parse_var(
                &env_map,
                "MAXIMUM_CLIENT_DISCOUNT_BASE",
                defaults.maximum_client_discount_base,
            )?,
            indeterminate_error_cycles: parse_var(
                &env_map,
                "INDETERMINATE_ERROR_CYCLES",
                defaults.indeterminate_error_cycles,
            )?,
            state_retention_days: parse_var(
                &env_map,
                "STATE_RETENTION_DAYS",
                defaults.state_retention_days,
            )?,
        };
        settings.validate()?;

        if let Some(short) = entities.iter().find_map(|entity| match entity {
            MonitoredEntity::Category(name) if name.chars().count() < settings.search_min_chars => {
                Some(name)
            }
            _ => None,
        }) {
            return Err(ConfigError::InvalidValue(
                "MONITOR_CATEGORIES_FILE".to_string(),
                format!(
                    "category name {:?} is shorter than {} characters",
                    short, settings.search_min_chars
                ),
            ));
        }

        Ok(Config {
            port,
            database_path,
            cycle_interval_secs,
            max_concurrent_entities,
            telegram_bot_token,
            admin_contacts,
            subscriber_contacts,
            entities,
            wb_catalog_url: url("WB_CATALOG_URL", DEFAULT_WB_CATALOG_URL),
            wb_search_url: url("WB_SEARCH_URL", DEFAULT_WB_SEARCH_URL),
            wb_listing_url: url("WB_LISTING_URL", DEFAULT_WB_LISTING_URL),
            settings,
        })
    }
}

fn parse_var<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match env_map.get(key).map(|s| s.trim()) {
        None | Some("") => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(
                key.to_string(),
                format!("cannot parse {:?} as {}", raw, std::any::type_name::<T>()),
            )
        }),
    }
}

impl Config {
    /// Configuration that loads but cannot work as the operator likely expects.
    pub fn startup_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let articles = self
            .entities
            .iter()
            .filter(|e| matches!(e, MonitoredEntity::Article(_)))
            .count();
        if articles > 0 && self.settings.products_num_to_determine_spp > 1 {
            warnings.push(format!(
                "{} article(s) configured but PRODUCTS_NUM_TO_DETERMINE_SPP is {}; \
                 an article search usually returns a single product, \
                 so their SPP will stay indeterminate",
                articles, self.settings.products_num_to_determine_spp
            ));
        }

        if self.telegram_bot_token.is_some() {
            for (key, contacts) in [
                ("CONTACTS_ADMINS_FILE", &self.admin_contacts),
                ("CONTACTS_USERS_FILE", &self.subscriber_contacts),
            ] {
                let dropped: Vec<&str> = contacts
                    .iter()
                    .filter(|c| !is_chat_contact(c))
                    .map(String::as_str)
                    .collect();
                if dropped.is_empty() {
                    continue;
                }
                if dropped.len() == contacts.len() {
                    warnings.push(format!(
                        "{} has no Telegram contacts, nobody on it will be notified: {}",
                        key,
                        dropped.join(", ")
                    ));
                } else {
                    warnings.push(format!(
                        "{}: Telegram cannot deliver to {}",
                        key,
                        dropped.join(", ")
                    ));
                }
            }
        }

        warnings
    }
}

fn is_chat_contact(contact: &str) -> bool {
    contact
        .strip_prefix("telegram:")
        .unwrap_or(contact)
        .parse::<i64>()
        .is_ok()
}

/// Read meaningful lines: trimmed, skipping blanks and `#` comments.
pub fn read_lines(path: &str) -> std::io::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_lines(&content))
}

fn parse_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.to_string())
        .collect()
}

fn read_optional_file(
    env_map: &HashMap<String, String>,
    key: &str,
) -> Result<Vec<String>, ConfigError> {
    match env_map.get(key) {
        Some(path) => read_lines(path).map_err(|e| {
            ConfigError::InvalidValue(key.to_string(), format!("cannot read {}: {}", path, e))
        }),
        None => Ok(Vec::new()),
    }
}

/// A contact is `telegram:<chat id>`, a bare chat id, or an email address.
pub fn is_valid_contact(contact: &str) -> bool {
    if let Some(id) = contact.strip_prefix("telegram:") {
        return id.parse::<i64>().is_ok();
    }
    contact.parse::<i64>().is_ok() || contact.contains('@')
}

fn read_contacts(env_map: &HashMap<String, String>, key: &str) -> Result<Vec<String>, ConfigError> {
    let contacts = read_optional_file(env_map, key)?;
    if let Some(bad) = contacts.iter().find(|c| !is_valid_contact(c)) {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("invalid contact: {}", bad),
        ));
    }
    Ok(contacts)
}

fn parse_entities_from_map(
    env_map: &HashMap<String, String>,
) -> Result<Vec<MonitoredEntity>, ConfigError> {
    let mut entities = Vec::new();

    for line in read_optional_file(env_map, "MONITOR_ARTICLES_FILE")? {
        let article = line
            .parse::<u64>()
            .ok()
            .filter(|a| *a > 0)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "MONITOR_ARTICLES_FILE".to_string(),
                    format!("invalid article number: {}", line),
                )
            })?;
        let entity = MonitoredEntity::Article(article);
        if !entities.contains(&entity) {
            entities.push(entity);
        }
    }

    let mut seen_keys: Vec<_> = Vec::new();
    for line in read_optional_file(env_map, "MONITOR_CATEGORIES_FILE")? {
        let entity = MonitoredEntity::Category(line);
        let key = entity.key();
        if !seen_keys.contains(&key) {
            seen_keys.push(key);
            entities.push(entity);
        }
    }

    Ok(entities)
}
