//! Turns a fresh capture into what the model sees for one turn.
use base64::Engine as _;

use crate::errors::OperatorResult;
use crate::perception::annotator;
use crate::perception::traits::{ElementDetector, ScreenCapture};
use crate::perception::types::{Observation, Screenshot};

/// Run the perception pipeline:
///
/// 1. Capture screenshot.
/// 2. If a detector is supplied, detect elements and annotate their labels.
/// 3. A detector failure or an empty detection downgrades to the plain image
///    with `labels = None`, so the caller can switch strategies.
pub async fn observe(
    screen: &dyn ScreenCapture,
    detector: Option<&dyn ElementDetector>,
) -> OperatorResult<(Observation, Screenshot)> {
    let shot = screen.capture().await?;

    let Some(detector) = detector else {
        return Ok((plain(&shot), shot));
    };

    let labels = match detector.detect(&shot.image_bytes).await {
        Ok(labels) if !labels.is_empty() => labels,
        Ok(_) => {
            tracing::info!("no elements detected, sending plain screenshot");
            return Ok((plain(&shot), shot));
        }
        Err(e) => {
            tracing::warn!(error = %e, "element detection failed, sending plain screenshot");
            return Ok((plain(&shot), shot));
        }
    };

    let annotated = annotator::annotate_image(&shot.image_bytes, &labels)?;
    tracing::debug!(labels = labels.len(), "screenshot annotated");
    let obs = Observation {
        image_base64: base64::engine::general_purpose::STANDARD.encode(&annotated),
        meta: shot.meta,
        labels: Some(labels),
    };
    Ok((obs, shot))
}

fn plain(shot: &Screenshot) -> Observation {
    Observation {
        image_base64: shot.image_base64.clone(),
        meta: shot.meta,
        labels: None,
    }
}
