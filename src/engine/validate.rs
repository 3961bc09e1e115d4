use crate::limits::*;

use super::EngineError;

pub(crate) fn validate_identity(guest_name: &str, unit_id: &str) -> Result<(), EngineError> {
    if guest_name.is_empty() {
        return Err(EngineError::InvalidRequest("guest name must not be empty"));
    }
    if unit_id.is_empty() {
        return Err(EngineError::InvalidRequest("unit id must not be empty"));
    }
    if guest_name.len() > MAX_IDENTITY_LEN {
        return Err(EngineError::InvalidRequest("guest name too long"));
    }
    if unit_id.len() > MAX_IDENTITY_LEN {
        return Err(EngineError::InvalidRequest("unit id too long"));
    }
    Ok(())
}

pub(crate) fn validate_nights(nights: u32) -> Result<(), EngineError> {
    if nights == 0 {
        return Err(EngineError::InvalidRequest("number of nights must be positive"));
    }
    if nights > MAX_STAY_NIGHTS {
        return Err(EngineError::InvalidRequest("stay too long"));
    }
    Ok(())
}
