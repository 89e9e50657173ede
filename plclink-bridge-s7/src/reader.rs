//! Point readers: turn the configured point list into one cycle's values.

use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, warn};

use plclink_common::PointValues;

use crate::address::{AddressError, Area, translate};
use crate::config::PointDefinition;

/// Why a single point could not be read.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("bit offset {0} outside 0-7")]
    BitOutOfRange(u32),

    #[error("controller returned no data")]
    EmptyResponse,

    #[error("controller is not connected")]
    Disconnected,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("read timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("controller rejected read: {0}")]
    Rejected(String),
}

/// Raw byte access to a controller's memory areas.
#[async_trait]
pub trait Controller: Send {
    async fn read_area(&mut self, area: Area, start: u32, count: u16) -> Result<Vec<u8>, ReadError>;

    /// `false` once the transport is gone.
    fn is_connected(&self) -> bool;

    async fn close(&mut self);
}

/// Produces point values for one acquisition cycle.
#[async_trait]
pub trait PointReader: Send {
    /// Read every point. Failing points are logged and left out of the
    /// result; they never abort the cycle.
    async fn read(&mut self, points: &[PointDefinition]) -> PointValues;

    /// Whether the underlying connection survived the last cycle.
    fn is_connected(&self) -> bool {
        true
    }

    async fn close(&mut self) {}
}

/// Reads points from a live controller, one byte per point.
pub struct ControllerReader<C> {
    controller: C,
}

impl<C: Controller> ControllerReader<C> {
    pub fn new(controller: C) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    /// Read and decode a single point.
    pub async fn read_point(&mut self, point: &PointDefinition) -> Result<bool, ReadError> {
        let address = translate(&point.address)?;
        if address.bit > 7 {
            return Err(ReadError::BitOutOfRange(address.bit));
        }

        let data = self.controller.read_area(address.area, address.byte, 1).await?;
        let byte = *data.first().ok_or(ReadError::EmptyResponse)?;
        Ok((byte >> address.bit) & 1 == 1)
    }
}

#[async_trait]
impl<C: Controller> PointReader for ControllerReader<C> {
    async fn read(&mut self, points: &[PointDefinition]) -> PointValues {
        let mut values = PointValues::new();

        for point in points {
            match self.read_point(point).await {
                Ok(value) => {
                    values.insert(point.name.clone(), value);
                }
                Err(e) => {
                    warn!(
                        point = %point.name,
                        address = %point.address,
                        error = %e,
                        "Failed to read point"
                    );
                }
            }
        }

        values
    }

    fn is_connected(&self) -> bool {
        self.controller.is_connected()
    }

    async fn close(&mut self) {
        self.controller.close().await;
    }
}

/// Pseudo-random values for every point, for staging without hardware.
///
/// Addresses still go through the translator, so a point list that would
/// fail against a controller fails here too.
pub struct SyntheticReader {
    rng: StdRng,
}

impl SyntheticReader {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }
}

#[async_trait]
impl PointReader for SyntheticReader {
    async fn read(&mut self, points: &[PointDefinition]) -> PointValues {
        let mut values = PointValues::new();

        for point in points {
            match translate(&point.address) {
                Ok(_) => {
                    values.insert(point.name.clone(), self.rng.gen_bool(0.5));
                }
                Err(e) => {
                    warn!(
                        point = %point.name,
                        address = %point.address,
                        error = %e,
                        "Failed to read point"
                    );
                }
            }
        }

        debug!(points = values.len(), "Generated synthetic values");
        values
    }
}
