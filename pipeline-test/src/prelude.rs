//! Common [`pipeline_test`](crate) types, traits, and functions.

pub use crate::net::{CannedResponse, CannedServer, RecordedRequest};

pub use color_eyre::eyre::{eyre, Report, Result};
pub use proptest::prelude::*;
