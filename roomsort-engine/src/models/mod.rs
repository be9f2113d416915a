//! Data models for roomsort-engine
//!
//! - Image records and classification state
//! - Label vocabularies for both tiers
//! - Request status summaries

pub mod image_record;
pub mod labels;
pub mod status;

pub use image_record::{
    split_image_file, Classification, ImageRecord, NONE_CLASSIFICATION, SUPPORTED_IMAGE_TYPES,
    UNCLASSIFIED_CLASSIFICATION,
};
pub use status::{ImageStatus, RequestStatus};
