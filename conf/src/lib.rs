//! DotCelery process configuration object and helpers.
mod loading;
mod logging;
mod object;

pub use self::loading::load;
pub use self::loading::Error;
pub use self::logging::LoggingConf;
pub use self::logging::LoggingDrain;
pub use self::logging::LoggingLevel;
pub use self::object::BackendConf;
pub use self::object::ClientConf;
pub use self::object::Conf;
pub use self::object::DeadLetterConf;
pub use self::object::KillSwitchConf;
pub use self::object::OutboxConf;
pub use self::object::PartitionConf;
pub use self::object::SagaConf;
pub use self::object::SecurityConf;
pub use self::object::WorkerConf;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_yaml() {
        let conf = Conf::default();
        let yaml = serde_yaml::to_string(&conf).unwrap();
        let reloaded: Conf = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(conf, reloaded);
    }

    #[test]
    fn load_missing_file_reports_path_not_found() {
        let result = load("/nonexistent/path/to/dotcelery.yaml");
        let error = result.unwrap_err();
        assert!(error.downcast_ref::<Error>().is_some());
    }
}
