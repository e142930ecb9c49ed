use crate::timing::TimingParameters;

/// Somewhere the timing configuration survives a reboot, e.g. an EEPROM record.
pub trait ParameterStore {
    type Error: core::fmt::Debug;

    /// Returns `None` if nothing has been saved yet.
    fn load(&mut self) -> Result<Option<TimingParameters>, Self::Error>;

    fn save(&mut self, params: &TimingParameters) -> Result<(), Self::Error>;
}

/// Loads the saved configuration, falling back to [`TimingParameters::DEFAULT`] when the store
/// fails, is empty, or holds values outside the accepted ranges.
pub fn load_parameters<TStore: ParameterStore>(store: &mut TStore) -> TimingParameters {
    match store.load() {
        Ok(Some(params)) => match params.validate() {
            Ok(()) => {
                log::info!("Loaded timing parameters: {:?}", params);
                params
            }
            Err(err) => {
                log::warn!("Saved timing parameters rejected ({}), using defaults", err);
                TimingParameters::DEFAULT
            }
        },
        Ok(None) => {
            log::info!("No saved timing parameters, using defaults");
            TimingParameters::DEFAULT
        }
        Err(err) => {
            log::warn!("Failed to load timing parameters ({:?}), using defaults", err);
            TimingParameters::DEFAULT
        }
    }
}
