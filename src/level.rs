//! The nested-constructor state: one frame per open constructor, each tracking its remaining size and the
//! tag-length schema its children are read with.
//!
//! Every byte committed through the buffer is propagated as a size decrement through all active frames, so a
//! definite frame reaches zero exactly when its last child has been consumed. Indefinite frames go negative and are
//! closed by an explicit end-of-content element instead.

use crate::def::TlId;
use crate::item::Form;

/// Maximum nesting depth.
pub const MAX_DEPTH: usize = 1024;

/// Levels are counted from 1, the human way.
pub const FIRST_LEVEL: usize = 1;

// --- Frame ----------------------------------------------------------------------------------------------------------

/// One open constructor.
#[derive(Clone, Debug)]
pub struct Frame {
    pub form: Form,
    /// Schema for reading the children of this constructor.
    pub content_tl: TlId,
    /// Bytes of this constructor's value not yet consumed. Negative for indefinite frames.
    pub remaining: i64,
}

// --- LevelStack -----------------------------------------------------------------------------------------------------

/// The stack of open constructor frames. `frames[0]` is the root frame at [FIRST_LEVEL].
pub struct LevelStack {
    frames: Vec<Frame>,
}

impl LevelStack {
    pub fn new(root_tl: TlId) -> Self {
        let mut stack = Self { frames: Vec::new() };
        stack.reset(root_tl);
        stack
    }

    /// Re-seed the stack for a new input file.
    pub fn reset(&mut self, root_tl: TlId) {
        self.frames.clear();
        self.frames.push(Frame {
            form: Form::Unknown,
            content_tl: root_tl,
            remaining: 0,
        });
    }

    /// The current level number, starting from [FIRST_LEVEL].
    pub fn current_level(&self) -> usize {
        self.frames.len()
    }

    pub fn current_form(&self) -> Form {
        self.frames.last().expect("root frame always present").form
    }

    /// Remaining size of the innermost frame.
    pub fn current_size(&self) -> i64 {
        self.frames.last().expect("root frame always present").remaining
    }

    /// Schema for reading triplets at the current level.
    pub fn current_tl(&self) -> TlId {
        self.frames.last().expect("root frame always present").content_tl
    }

    /// True when the innermost frame can still hold `size` more bytes. Indefinite and root frames always can.
    pub fn enough(&self, size: i64) -> bool {
        let frame = self.frames.last().expect("root frame always present");
        frame.form != Form::Definite || frame.remaining >= size
    }

    /// Enter a constructor of value length `size`. The child schema comes from the matched rule's override when
    /// present, otherwise it is inherited from the parent frame. Returns false when the depth limit is hit.
    #[must_use]
    pub fn down(&mut self, size: i64, content_tl: Option<TlId>, form: Form) -> bool {
        if self.frames.len() >= MAX_DEPTH + FIRST_LEVEL {
            return false;
        }
        let inherited = self.current_tl();
        self.frames.push(Frame {
            form,
            content_tl: content_tl.unwrap_or(inherited),
            remaining: size,
        });
        true
    }

    /// Leave the innermost constructor. The root frame is never popped.
    pub fn up(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// Propagate `size` consumed bytes through every active frame.
    pub fn consume(&mut self, size: usize) {
        for frame in &mut self.frames {
            frame.remaining -= size as i64;
        }
    }

    /// Frames above the root, outermost first, for the premature-EOF check.
    pub fn open_frames(&self) -> &[Frame] {
        &self.frames[1..]
    }
}
