const FLEETWATCH_SECRET: &str = "FLEETWATCH_SECRET";

pub fn get_secret() -> Option<String> {
    let secret_from_env = std::env::var(FLEETWATCH_SECRET);
    secret_from_env.ok()
}

const FLEETWATCH_UPSTREAM: &str = "FLEETWATCH_UPSTREAM";

pub fn get_upstream_url() -> Option<String> {
    let url_from_env = std::env::var(FLEETWATCH_UPSTREAM);
    url_from_env.ok()
}
