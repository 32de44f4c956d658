/// One rung of the downscale ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionStep {
    pub height: u32,
    pub label: &'static str,
}

/// Standard output heights, strictly decreasing.
pub const RESOLUTIONS: [ResolutionStep; 4] = [
    ResolutionStep { height: 1080, label: "1080p" },
    ResolutionStep { height: 720, label: "720p" },
    ResolutionStep { height: 480, label: "480p" },
    ResolutionStep { height: 360, label: "360p" },
];

/// Height every scale decision is made relative to. Source resolution is not probed.
pub const ASSUMED_SOURCE_HEIGHT: u32 = 1080;

/// Most rungs a single run may descend.
pub const MAX_SCALE_STEPS: u32 = 3;

/// Target height after descending `step` rungs from `current_height`, or `None` for step 0.
///
/// `step` is cumulative: callers pass the total number of rungs descended so far,
/// not the change since the last call.
pub fn get_scale_height(current_height: u32, step: u32) -> Option<u32> {
    if step == 0 {
        return None;
    }

    let current_index = RESOLUTIONS
        .iter()
        .position(|r| r.height <= current_height)
        .unwrap_or(0);

    let target_index = current_index
        .saturating_add(step as usize)
        .min(RESOLUTIONS.len() - 1);
    Some(RESOLUTIONS[target_index].height)
}

pub fn label_for_height(height: u32) -> Option<&'static str> {
    RESOLUTIONS.iter().find(|r| r.height == height).map(|r| r.label)
}
