/// Entity abstraction for wemod
///
/// All entities (binary sensors today) implement the Entity trait.
///
/// Base trait that all entities must implement
pub trait Entity: Send + Sync {
    /// Serialize current state to JSON for Engine storage.
    ///
    /// Entities that read through to a device propagate the device's error.
    fn state_json(&self) -> anyhow::Result<serde_json::Value>;

    /// Return the platform type of this entity (e.g. "binary_sensor")
    fn platform(&self) -> &'static str;
}
