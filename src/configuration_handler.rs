use crate::{
    availability::{OperatingWindow, SlotSettings, DEFAULT_GRANULARITY_MINUTES},
    configuration::Configuration,
    error::ValidationError,
    types::{parse_closing_time, parse_time_of_day},
};
use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "agende_mais",
    about = "Appointment booking for salons, barbershops and pet shops"
)]
pub struct ConfigurationHandler {
    /// Port the HTTP server listens on
    #[arg(long, env = "AGENDE_PORT", default_value = "3000")]
    port: String,

    /// Password expected in the x-admin-password header
    #[arg(long, env = "AGENDE_ADMIN_PASSWORD")]
    password: String,

    /// Postgres connection. Appointments are kept in memory without it
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Default opening time (HH:MM)
    #[arg(
        long,
        env = "AGENDE_OPENING",
        default_value = "08:00",
        value_parser = parse_time_of_day
    )]
    opening: i32,

    /// Default closing time (HH:MM)
    #[arg(
        long,
        env = "AGENDE_CLOSING",
        default_value = "20:00",
        value_parser = parse_closing_time
    )]
    closing: i32,

    /// Default minutes between two slots
    #[arg(long, env = "AGENDE_GRANULARITY", default_value_t = DEFAULT_GRANULARITY_MINUTES)]
    granularity: i32,

    /// Insert an example establishment on startup
    #[arg(long)]
    demo: bool,
}

impl ConfigurationHandler {
    /// Reads `.env` if present, then command line and environment.
    pub fn parse_arguments() -> Self {
        if let Err(err) = dotenvy::dotenv() {
            tracing::debug!(%err, "No .env file loaded");
        }
        Self::parse()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.default_slot_settings().validate()
    }
}

impl Configuration for ConfigurationHandler {
    fn password(&self) -> String {
        self.password.clone()
    }

    fn port(&self) -> String {
        self.port.clone()
    }

    fn database_url(&self) -> Option<String> {
        self.database_url.clone()
    }

    fn default_slot_settings(&self) -> SlotSettings {
        SlotSettings {
            window: OperatingWindow {
                start_minutes: self.opening,
                end_minutes: self.closing,
            },
            granularity_minutes: self.granularity,
        }
    }

    fn seed_demo(&self) -> bool {
        self.demo
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let configuration =
            ConfigurationHandler::try_parse_from(["agende_mais", "--password", "segredo"]).unwrap();

        assert_eq!(configuration.password(), "segredo");
        assert_eq!(configuration.default_slot_settings(), SlotSettings::default());
        assert!(!configuration.seed_demo());
        configuration.validate().unwrap();
    }

    #[test]
    fn test_custom_window() {
        let configuration = ConfigurationHandler::try_parse_from([
            "agende_mais",
            "--password",
            "segredo",
            "--port",
            "8080",
            "--opening",
            "09:30",
            "--closing",
            "18:00",
            "--granularity",
            "15",
            "--demo",
        ])
        .unwrap();

        assert_eq!(configuration.port(), "8080");
        assert!(configuration.seed_demo());
        assert_eq!(
            configuration.default_slot_settings(),
            SlotSettings {
                window: OperatingWindow {
                    start_minutes: 570,
                    end_minutes: 1080,
                },
                granularity_minutes: 15,
            }
        );
    }

    #[test]
    fn test_closing_at_midnight() {
        let configuration = ConfigurationHandler::try_parse_from([
            "agende_mais",
            "--password",
            "segredo",
            "--closing",
            "24:00",
        ])
        .unwrap();

        assert_eq!(
            configuration.default_slot_settings().window.end_minutes,
            1440
        );
        configuration.validate().unwrap();
    }

    #[test]
    fn test_malformed_time_is_rejected() {
        ConfigurationHandler::try_parse_from([
            "agende_mais",
            "--password",
            "segredo",
            "--opening",
            "8h",
        ])
        .unwrap_err();
    }

    #[test]
    fn test_inverted_window_fails_validation() {
        let configuration = ConfigurationHandler::try_parse_from([
            "agende_mais",
            "--password",
            "segredo",
            "--opening",
            "18:00",
            "--closing",
            "09:00",
        ])
        .unwrap();

        assert_eq!(
            configuration.validate().unwrap_err(),
            ValidationError::InvalidWindow {
                start: 1080,
                end: 540
            }
        );
    }
}
