//! Pinbox Services Layer
//!
//! Player-side services that sit between the platform and the hosted
//! module: input routing and settings.

pub mod input;
pub mod settings;

pub use input::{InputChange, InputRouter, Key, TouchControl};
pub use settings::{Settings, SettingsError};
