const WATCHPOST_CONFIG: &str = "WATCHPOST_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "./watchpost.json";

pub fn get_config_path() -> String {
    std::env::var(WATCHPOST_CONFIG).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

const WATCHPOST_EVENTD_HANDLERS: &str = "WATCHPOST_EVENTD_HANDLERS";

const DEFAULT_HANDLER_COUNT: usize = 10;

pub fn get_default_handler_count() -> usize {
    DEFAULT_HANDLER_COUNT
}

/// Handler count override from the environment, if set to a positive number
pub fn get_handler_count() -> Option<usize> {
    let count_from_env = std::env::var(WATCHPOST_EVENTD_HANDLERS);
    count_from_env
        .ok()
        .and_then(|res| res.parse().ok())
        .filter(|count| *count > 0)
}
