//! Instantaneous input sampling and source arbitration.

use puppet_net::ReplicatedInput;

/// One frame's worth of controls for the owning participant.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct InputFrame {
    pub joy_x: f32,
    pub joy_y: f32,
    pub jump: bool,
    pub kick: bool,
    pub crouch: bool,
}

impl InputFrame {
    /// Clamp joystick magnitude to unit length; shorter deflections pass through.
    pub fn normalized(mut self) -> Self {
        let mag = (self.joy_x * self.joy_x + self.joy_y * self.joy_y).sqrt();
        if mag > 1.0 {
            self.joy_x /= mag;
            self.joy_y /= mag;
        }
        self
    }
}

impl From<InputFrame> for ReplicatedInput {
    fn from(f: InputFrame) -> Self {
        ReplicatedInput {
            joy_x: f.joy_x,
            joy_y: f.joy_y,
            jump: f.jump,
            kick: f.kick,
            crouch: f.crouch,
        }
    }
}

impl From<ReplicatedInput> for InputFrame {
    fn from(r: ReplicatedInput) -> Self {
        InputFrame {
            joy_x: r.joy_x,
            joy_y: r.joy_y,
            jump: r.jump,
            kick: r.kick,
            crouch: r.crouch,
        }
    }
}

/// Pick the active input source for this frame. Priority when several could
/// apply: VR controller, then desktop keys, then gamepad, then neutral.
pub fn arbitrate(
    vr: Option<InputFrame>,
    desktop: Option<InputFrame>,
    gamepad: Option<InputFrame>,
) -> InputFrame {
    vr.or(desktop)
        .or(gamepad)
        .unwrap_or_default()
        .normalized()
}
