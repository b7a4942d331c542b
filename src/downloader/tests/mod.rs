use super::test_helpers::*;
use super::*;
use crate::error::DownloadError;
use crate::signal::Signal;
use crate::types::{DownloadId, Status};
