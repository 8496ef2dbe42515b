//! Quality variant selection for playback.
//!
//! Selection is read-only: it never changes the item or triggers processing.

use mediagate_common::QualityLabel;
use mediagate_db::models::MediaItem;
use serde::Serialize;
use thiserror::Error;

/// Labels present on the item, lowest first.
pub fn selectable_variants(item: &MediaItem) -> Vec<QualityLabel> {
    item.quality_variants.keys().copied().collect()
}

/// Standing playback preference of the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionPreference {
    pub low_bandwidth: bool,
}

/// Label playback starts on: highest available, or lowest on low bandwidth.
pub fn default_variant(item: &MediaItem, pref: SelectionPreference) -> Option<QualityLabel> {
    let mut labels = item.quality_variants.keys().copied();
    if pref.low_bandwidth {
        labels.next()
    } else {
        labels.next_back()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VariantError {
    #[error("Variant {0} is not available")]
    NotAvailable(QualityLabel),
}

/// Selector over an item's variants.
///
/// Only exists when there is an actual choice, i.e. two or more variants.
#[derive(Debug, Clone, Serialize)]
pub struct VariantSelector {
    available: Vec<QualityLabel>,
    current: QualityLabel,
}

impl VariantSelector {
    pub fn for_item(item: &MediaItem, pref: SelectionPreference) -> Option<Self> {
        let available = selectable_variants(item);
        if available.len() < 2 {
            return None;
        }
        let current = default_variant(item, pref)?;
        Some(Self { available, current })
    }

    pub fn available(&self) -> &[QualityLabel] {
        &self.available
    }

    pub fn current(&self) -> QualityLabel {
        self.current
    }

    pub fn select(&mut self, label: QualityLabel) -> Result<(), VariantError> {
        if !self.available.contains(&label) {
            return Err(VariantError::NotAvailable(label));
        }
        self.current = label;
        Ok(())
    }
}
