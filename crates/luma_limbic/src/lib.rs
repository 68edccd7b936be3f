//! # LUMA Limbic Layer
//!
//! Fast, stateless reading of the user's current regulation state from the
//! five universal signals.
//!
//! - **Band**: Green / Amber / Red from the composite activation score
//! - **Trend**: earlier half of the window against the recent half
//! - **Confidence**: grows with the number of signals, zero below the minimum

mod arousal;

pub use arousal::ArousalClassifier;
