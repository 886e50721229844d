pub mod adjustments;
pub mod classify;
pub mod grading;

pub use adjustments::{parse_adjustments, reply_requests_more_info, AdjustmentSet};
pub use classify::{classify_fallback, normalize_category, ImageCategory, ImageClassifier};
pub use grading::{decode_rgb, encode_png, grade_image, GradingError};
