//! Accurate mode: a second look at a close-up around a proposed click.
use crate::agent_engine::history::Conversation;
use crate::agent_engine::parser::{self, ParseContext};
use crate::agent_engine::prompts;
use crate::agent_engine::state::{Action, ClickAction};
use crate::errors::{OperatorError, OperatorResult};
use crate::executor::coordinator::{crop_half_extent_percent, percent_to_pixel};
use crate::llm::registry::ResolvedModel;
use crate::llm::types::ChatMessage;
use crate::perception::traits::ScreenCapture;
use crate::perception::types::ScreenshotMeta;

/// Ask the model to correct `click` using a `crop_px` square around it.
///
/// Every way this can go wrong is an [`OperatorError::Refinement`]: the
/// unrefined coordinate is never returned as a fallback.
pub async fn refine_click(
    model: &ResolvedModel,
    screen: &dyn ScreenCapture,
    transcript: &Conversation,
    click: &ClickAction,
    meta: &ScreenshotMeta,
    crop_px: u32,
) -> OperatorResult<ClickAction> {
    let px = percent_to_pixel(&click.x_percent, meta.physical_width)?;
    let py = percent_to_pixel(&click.y_percent, meta.physical_height)?;

    let closeup = screen
        .capture_region(px, py, crop_px)
        .await
        .map_err(|e| OperatorError::Refinement(format!("close-up capture failed: {e}")))?;

    let (half_w, half_h) = crop_half_extent_percent(crop_px, meta.physical_width, meta.physical_height);
    let prompt = prompts::refinement_prompt(click.x_percent, click.y_percent, half_w, half_h);
    let messages = transcript.with_turn(ChatMessage::user_with_image(&closeup.image_base64, prompt));

    tracing::debug!(x = click.x_percent, y = click.y_percent, crop_px, "requesting refinement");
    let response = model
        .provider
        .chat(messages, &model.call)
        .await
        .map_err(|e| OperatorError::Refinement(format!("refinement call failed: {e}")))?;

    let reply = response.content.trim();
    if reply.eq_ignore_ascii_case(prompts::REFINE_ERROR_SENTINEL) {
        return Err(OperatorError::Refinement(
            "model could not locate the target in the close-up".into(),
        ));
    }

    match parser::parse(reply, &ParseContext::new("")).as_slice() {
        [Action::Click(refined)] => {
            tracing::info!(
                from_x = click.x_percent,
                from_y = click.y_percent,
                to_x = refined.x_percent,
                to_y = refined.y_percent,
                "click refined"
            );
            Ok(ClickAction {
                x_percent: refined.x_percent,
                y_percent: refined.y_percent,
                ..click.clone()
            })
        }
        _ => Err(OperatorError::Refinement(format!(
            "refinement reply is not a click: {reply}"
        ))),
    }
}
