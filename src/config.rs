use std::env;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::optimizer::PackingConfig;
use crate::planner::{PlanOptions, PlanningMode};

/// Complete application configuration, loaded from environment variables or default values.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub planner: PlannerConfig,
}

impl AppConfig {
    /// Creates a configuration from the currently available environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(env_string)
    }

    /// Creates a configuration from an arbitrary variable source.
    ///
    /// `lookup` returns `None` for unset or blank variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            api: ApiConfig::from_lookup(&lookup),
            planner: PlannerConfig::from_lookup(&lookup),
        }
    }
}

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    bind_ip: IpAddr,
    display_host: String,
    port: u16,
}

impl ApiConfig {
    const HOST_VAR: &'static str = "STUFFING_PLANNER_API_HOST";
    const PORT_VAR: &'static str = "STUFFING_PLANNER_API_PORT";
    const DEFAULT_HOST: &'static str = "0.0.0.0";
    const DEFAULT_PORT: u16 = 8080;

    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        let host_value = lookup(Self::HOST_VAR).unwrap_or_else(|| Self::DEFAULT_HOST.to_string());
        let (bind_ip, effective_host) = match host_value.parse::<IpAddr>() {
            Ok(ip) => (ip, host_value),
            Err(err) => {
                log::warn!(
                    "Could not parse {} ('{}'): {}. Using {}.",
                    Self::HOST_VAR,
                    host_value,
                    err,
                    Self::DEFAULT_HOST
                );
                (
                    IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    Self::DEFAULT_HOST.to_string(),
                )
            }
        };

        let port = match lookup(Self::PORT_VAR) {
            Some(raw) => match raw.parse::<u16>() {
                Ok(value) if value != 0 => value,
                Ok(_) => {
                    log::warn!(
                        "{} must not be 0. Using {}.",
                        Self::PORT_VAR,
                        Self::DEFAULT_PORT
                    );
                    Self::DEFAULT_PORT
                }
                Err(err) => {
                    log::warn!(
                        "Could not parse {} ('{}'): {}. Using {}.",
                        Self::PORT_VAR,
                        raw,
                        err,
                        Self::DEFAULT_PORT
                    );
                    Self::DEFAULT_PORT
                }
            },
            None => Self::DEFAULT_PORT,
        };

        Self {
            bind_ip,
            display_host: effective_host,
            port,
        }
    }

    /// Socket address to bind the server to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }

    /// Visible hostname for logging and hints.
    pub fn display_host(&self) -> &str {
        &self.display_host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Indicates whether binding to all interfaces.
    pub fn binds_to_all_interfaces(&self) -> bool {
        match self.bind_ip {
            IpAddr::V4(addr) => addr == Ipv4Addr::UNSPECIFIED,
            IpAddr::V6(addr) => addr == Ipv6Addr::UNSPECIFIED,
        }
    }
}

/// Engine tolerances and planning defaults.
#[derive(Clone, Debug)]
pub struct PlannerConfig {
    packing: PackingConfig,
    max_instances: usize,
    include_coming_soon: bool,
}

impl PlannerConfig {
    const SUPPORT_RATIO_VAR: &'static str = "STUFFING_PLANNER_SUPPORT_RATIO";
    const HEIGHT_EPSILON_VAR: &'static str = "STUFFING_PLANNER_HEIGHT_EPSILON";
    const GENERAL_EPSILON_VAR: &'static str = "STUFFING_PLANNER_GENERAL_EPSILON";
    const MAX_INSTANCES_VAR: &'static str = "STUFFING_PLANNER_MAX_INSTANCES";
    const COMING_SOON_VAR: &'static str = "STUFFING_PLANNER_INCLUDE_COMING_SOON";

    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        let support_ratio = load_f64_with_warning(
            lookup(Self::SUPPORT_RATIO_VAR),
            Self::SUPPORT_RATIO_VAR,
            PackingConfig::DEFAULT_SUPPORT_RATIO,
            |value| (0.0..=1.0).contains(&value),
            "must be between 0 and 1",
            "Adjusted minimum support may lead to unstable stacks",
        );

        let height_epsilon = load_f64_with_warning(
            lookup(Self::HEIGHT_EPSILON_VAR),
            Self::HEIGHT_EPSILON_VAR,
            PackingConfig::DEFAULT_HEIGHT_EPSILON,
            |value| value > 0.0,
            "must be greater than 0",
            "Adjusted height tolerance may cause unexpected placements",
        );

        let general_epsilon = load_f64_with_warning(
            lookup(Self::GENERAL_EPSILON_VAR),
            Self::GENERAL_EPSILON_VAR,
            PackingConfig::DEFAULT_GENERAL_EPSILON,
            |value| value > 0.0,
            "must be greater than 0",
            "Adjusted tolerances may cause numerical instabilities",
        );

        let max_instances = match lookup(Self::MAX_INSTANCES_VAR) {
            Some(raw) => match raw.parse::<usize>() {
                Ok(value) if value >= 1 => value,
                Ok(_) => {
                    log::warn!(
                        "{} must be at least 1. Using {}.",
                        Self::MAX_INSTANCES_VAR,
                        PlanOptions::DEFAULT_MAX_INSTANCES
                    );
                    PlanOptions::DEFAULT_MAX_INSTANCES
                }
                Err(err) => {
                    log::warn!(
                        "Could not parse {} ('{}'): {}. Using {}.",
                        Self::MAX_INSTANCES_VAR,
                        raw,
                        err,
                        PlanOptions::DEFAULT_MAX_INSTANCES
                    );
                    PlanOptions::DEFAULT_MAX_INSTANCES
                }
            },
            None => PlanOptions::DEFAULT_MAX_INSTANCES,
        };

        let include_coming_soon = lookup(Self::COMING_SOON_VAR)
            .and_then(|raw| parse_bool(&raw, Self::COMING_SOON_VAR))
            .unwrap_or(false);

        let packing = PackingConfig::builder()
            .support_ratio(support_ratio)
            .height_epsilon(height_epsilon)
            .general_epsilon(general_epsilon)
            .build();

        Self {
            packing,
            max_instances,
            include_coming_soon,
        }
    }

    /// Returns the configured PackingConfig.
    pub fn packing_config(&self) -> PackingConfig {
        self.packing
    }

    /// Plan options used when a request does not override them.
    pub fn plan_options(&self, mode: PlanningMode) -> PlanOptions {
        PlanOptions {
            mode,
            include_coming_soon: self.include_coming_soon,
            max_instances: self.max_instances,
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            packing: PackingConfig::default(),
            max_instances: PlanOptions::DEFAULT_MAX_INSTANCES,
            include_coming_soon: false,
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_owned())
            }
        }
        Err(env::VarError::NotPresent) => None,
        Err(err) => {
            log::warn!("Access to {} failed: {}. Using default value.", name, err);
            None
        }
    }
}

fn parse_bool(raw: &str, var_name: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        other => {
            log::warn!(
                "Could not interpret {} ('{}') as boolean value. Using default value.",
                var_name,
                other
            );
            None
        }
    }
}

fn load_f64_with_warning(
    raw: Option<String>,
    var_name: &str,
    default: f64,
    validator: impl Fn(f64) -> bool,
    invalid_hint: &str,
    warning: &str,
) -> f64 {
    match raw {
        Some(raw) => match raw.parse::<f64>() {
            Ok(value) => {
                if !validator(value) {
                    log::warn!(
                        "{} contains invalid value '{}': {}. Using {}.",
                        var_name,
                        raw,
                        invalid_hint,
                        default
                    );
                    default
                } else {
                    let tolerance = (default.abs().max(1.0)) * 1e-9;
                    if (value - default).abs() > tolerance {
                        log::warn!("{} ({} = {}).", warning, var_name, value);
                    }
                    value
                }
            }
            Err(err) => {
                log::warn!(
                    "Could not parse {} ('{}') as number: {}. Using {}.",
                    var_name,
                    raw,
                    err,
                    default
                );
                default
            }
        },
        None => default,
    }
}
