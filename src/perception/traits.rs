use async_trait::async_trait;

use crate::errors::OperatorResult;
use crate::perception::types::{LabelMap, Screenshot};

/// Platform screenshot source. Captured images must include the live cursor.
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    async fn capture(&self) -> OperatorResult<Screenshot>;

    /// Square close-up of `size` physical pixels centered on `(x, y)`.
    async fn capture_region(&self, x: i32, y: i32, size: u32) -> OperatorResult<Screenshot>;
}

/// Optional UI element detector used by the labeled strategy.
#[async_trait]
pub trait ElementDetector: Send + Sync {
    async fn detect(&self, image_bytes: &[u8]) -> OperatorResult<LabelMap>;
}
