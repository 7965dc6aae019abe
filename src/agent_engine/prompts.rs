// Prompt text for each kind of model call.
use crate::executor::dispatcher::OsFamily;

/// Reply the refinement turn gives when it cannot place the cursor.
pub const REFINE_ERROR_SENTINEL: &str = "ERROR";

const PLAIN_SYSTEM: &str = "\
You are operating a {os} computer with a mouse and keyboard, the same way a person would.

Each turn you receive a screenshot and reply with exactly one command:

1. CLICK { \"x\": \"x%\", \"y\": \"y%\", \"description\": \"what you click\", \"reason\": \"why\" }
   Coordinates are percentages of the screen width and height.
2. MOUSE { \"x\": \"x%\", \"y\": \"y%\", \"vert-scroll\": 0, \"left-click\": false }
   Moves the cursor. A non-zero vert-scroll scrolls there (positive is up) instead of clicking.
3. TYPE \"text\"
4. PRESS keys
   Keys held together, e.g. PRESS ctrl+c.
5. SEARCH \"program name\"
   Opens the application launcher and starts the program.
6. DONE
   The objective is complete.

Reply with the command only.";

const LABELED_SYSTEM: &str = "\
You are operating a {os} computer with a mouse and keyboard, the same way a person would.

Each turn you receive a screenshot where clickable elements carry labels like ~12.
Reply with a JSON array of operations, executed in order:

[{\"thought\": \"...\", \"operation\": \"click\", \"label\": \"~12\"}]
[{\"thought\": \"...\", \"operation\": \"click\", \"x\": \"0.50\", \"y\": \"0.60\"}]
[{\"thought\": \"...\", \"operation\": \"write\", \"content\": \"text to type\"}]
[{\"thought\": \"...\", \"operation\": \"press\", \"keys\": [\"ctrl\", \"l\"]}]
[{\"thought\": \"...\", \"operation\": \"search\", \"content\": \"program name\"}]
[{\"thought\": \"...\", \"operation\": \"done\", \"summary\": \"what was achieved\"}]

Prefer labels. x and y are fractions of the screen between 0 and 1.
Only use labels that appear in the current screenshot. Reply with JSON only.";

pub fn system_prompt(labeled: bool, os: OsFamily) -> String {
    let os_name = match os {
        OsFamily::MacOs => "macOS",
        OsFamily::Windows => "Windows",
        OsFamily::Linux => "Linux",
    };
    let template = if labeled { LABELED_SYSTEM } else { PLAIN_SYSTEM };
    template.replace("{os}", os_name)
}

pub fn objective_message(objective: &str) -> String {
    format!("Please take the next best action. The objective is: {objective}")
}

/// Instruction attached to the screenshot of a turn.
pub fn turn_instruction(objective: &str, first_turn: bool, label_list: Option<&str>) -> String {
    let mut text = if first_turn {
        format!("Objective: {objective}\nThis is the current screen. What is the first action?")
    } else {
        format!("Objective: {objective}\nThis is the screen after your previous action. What is the next action?")
    };
    if let Some(list) = label_list {
        text.push_str("\n\nLabels on this screen:\n");
        text.push_str(list);
    }
    text
}

/// Follow-up for accurate mode: the close-up spans `half_w`/`half_h`
/// percent of the screen on each side of the proposed point. The crop is
/// clamped to the screen, so the reported edges are too.
pub fn refinement_prompt(x_percent: f64, y_percent: f64, half_w: f64, half_h: f64) -> String {
    let edge = |v: f64| v.clamp(0.0, 100.0);
    format!(
        "This is a close-up of the screen centered on your proposed click at x={x_percent:.3}%, y={y_percent:.3}%. \
         The cursor is drawn at that point. The left edge of the image is x={:.3}% and the right edge is x={:.3}%; \
         the top edge is y={:.3}% and the bottom edge is y={:.3}%. \
         Reply with a corrected CLICK {{ \"x\": \"x%\", \"y\": \"y%\" }} in full-screen percentages, \
         or reply {REFINE_ERROR_SENTINEL} if the target is not in this image.",
        edge(x_percent - half_w),
        edge(x_percent + half_w),
        edge(y_percent - half_h),
        edge(y_percent + half_h),
    )
}

pub fn summary_prompt(objective: &str) -> String {
    format!(
        "The objective \"{objective}\" is complete. Looking at the screen, summarize in one or two sentences what was achieved."
    )
}

/// Second, independent question asked alongside the decision in labeled mode.
pub fn cross_check_prompt(objective: &str, label_list: &str) -> String {
    format!(
        "Objective: {objective}\nLabels on this screen:\n{label_list}\n\n\
         Which single label should be clicked next? Reply with the label only, like ~4, or NONE."
    )
}

const PLAIN_FALLBACK: &str = "Labels are no longer available. \
Reply with one command per turn: CLICK { \"x\": \"x%\", \"y\": \"y%\" } with percentages, \
TYPE \"text\", PRESS keys, SEARCH \"program\" or DONE.";

/// Sent once when the labeled strategy is abandoned for the session.
pub fn labels_unavailable() -> String {
    PLAIN_FALLBACK.to_string()
}

/// The decision and the cross-check named different elements.
pub fn cross_check_disagreement(chosen: &str, checked: &str) -> String {
    format!(
        "You chose {chosen}, but asked separately you picked {checked}. \
         Nothing was clicked. Look again and reply with the element you really mean."
    )
}

/// User message explaining why the previous reply was rejected.
pub fn failure_report(cause: &str, switch_to_plain: bool) -> String {
    let mut text = format!("Your previous reply could not be executed: {cause}.");
    if switch_to_plain {
        text.push(' ');
        text.push_str(PLAIN_FALLBACK);
    } else {
        text.push_str(" Reply again using exactly one of the documented formats.");
    }
    text
}
