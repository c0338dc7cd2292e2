pub mod backbone;
pub mod cli;
pub mod data;
pub mod error;
pub mod history;
pub mod metrics;
pub mod model;
pub mod module;
pub mod plot;
pub mod training;
pub mod transform;

/// Class names; a file's label is the part of its name before the first `_`.
pub const SONG_TYPES: [&str; 4] = [
    "future house",
    "bass house",
    "progressive house",
    "melodic house",
];

/// Short forms of [`SONG_TYPES`] drawn on confusion matrices.
pub const DISPLAY_LABELS: [&str; 4] = ["FH", "BH", "PH", "MH"];
