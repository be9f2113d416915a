//! Test Helper Utilities
//!
//! Shared fakes and a workflow harness for roomsort-engine tests

#![allow(dead_code, unused_imports)]

pub mod db_utils;
pub mod fakes;
pub mod harness;

pub use db_utils::{create_test_db, resized_record, seed_records};
pub use fakes::{image_id_of, FakeDetector, FakeObjectStore, FakeVision, RecordingNotifier, RecordingSink};
pub use harness::{date, test_config, test_now, Harness};
