use crate::availability::SlotSettings;

pub trait Configuration: Clone + Send + Sync + 'static {
    fn password(&self) -> String;
    fn port(&self) -> String;
    fn database_url(&self) -> Option<String>;
    /// Slot settings for establishments created without their own.
    fn default_slot_settings(&self) -> SlotSettings;
    fn seed_demo(&self) -> bool;
}
