use thiserror::Error;

/// Environment variable consulted when no explicit device list is given.
pub const DEVICE_LIST_VAR: &str = "CUDA_VISIBLE_DEVICES";

/// Ordered accelerator slots for one run. Slot `i` is assigned chunk `i`,
/// so the slot count fixes the chunk count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceList {
    slots: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceListError {
    #[error("device list is empty")]
    Empty,
    #[error("device list has an empty slot at position {0}")]
    EmptySlot(usize),
}

impl DeviceList {
    /// Parse a comma-separated device list such as `"0,1,2"` or `"2,0,1"`.
    /// Items are trimmed; blank items are rejected.
    pub fn parse(raw: &str) -> Result<Self, DeviceListError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DeviceListError::Empty);
        }
        let mut slots = Vec::new();
        for (idx, item) in trimmed.split(',').enumerate() {
            let slot = item.trim();
            if slot.is_empty() {
                return Err(DeviceListError::EmptySlot(idx));
            }
            slots.push(slot.to_string());
        }
        Ok(Self { slots })
    }

    /// Resolve the run's device list: an explicit override wins, else the
    /// `CUDA_VISIBLE_DEVICES` environment variable, else the single slot "0".
    pub fn resolve(override_list: Option<&str>) -> Result<Self, DeviceListError> {
        if let Some(raw) = override_list {
            return Self::parse(raw);
        }
        match std::env::var(DEVICE_LIST_VAR) {
            Ok(raw) if !raw.trim().is_empty() => Self::parse(&raw),
            _ => Ok(Self::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[String] {
        &self.slots
    }
}

impl Default for DeviceList {
    fn default() -> Self {
        Self {
            slots: vec!["0".to_string()],
        }
    }
}
