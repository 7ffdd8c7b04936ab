//! In-memory text buffer with snapshot undo/redo.

use std::mem;

use kiln_types::CursorPos;

/// A text buffer with linear undo/redo history and a dirty flag.
///
/// History entries are full-text snapshots. `set_text` is a hard reset that
/// discards history; `insert_text` is an undoable edit.
#[derive(Debug, Clone, Default)]
pub struct Document {
    text: String,
    undo_stack: Vec<String>,
    redo_stack: Vec<String>,
    dirty: bool,
    /// Byte offset into `text`, always on a char boundary.
    cursor: usize,
}

impl Document {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A clean document holding `text`, as when a file is loaded from disk.
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Replace the whole buffer. Clears both history stacks.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.dirty = true;
        self.cursor = self.clamp_offset(self.cursor);
    }

    /// Splice `s` into the buffer at byte offset `pos`.
    ///
    /// `pos` past the end is clamped to the end; an offset inside a multi-byte
    /// character snaps back to that character's start. Inserting an empty
    /// string records nothing.
    pub fn insert_text(&mut self, pos: usize, s: &str) {
        if s.is_empty() {
            return;
        }
        let pos = self.clamp_offset(pos);

        self.undo_stack.push(self.text.clone());
        self.redo_stack.clear();

        self.text.insert_str(pos, s);
        if pos <= self.cursor {
            self.cursor += s.len();
        }
        self.dirty = true;
    }

    pub fn insert_text_at_cursor(&mut self, s: &str) {
        self.insert_text(self.cursor, s);
    }

    /// Restore the previous snapshot. Returns `false` when there is nothing to undo.
    pub fn undo(&mut self) -> bool {
        let Some(previous) = self.undo_stack.pop() else {
            return false;
        };
        let current = mem::replace(&mut self.text, previous);
        self.redo_stack.push(current);
        self.after_history_move();
        true
    }

    /// Re-apply the most recently undone snapshot. Returns `false` when there is nothing to redo.
    pub fn redo(&mut self) -> bool {
        let Some(next) = self.redo_stack.pop() else {
            return false;
        };
        let current = mem::replace(&mut self.text, next);
        self.undo_stack.push(current);
        self.after_history_move();
        true
    }

    /// Cursor as a byte offset.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Move the cursor. Clamped like [`Document::insert_text`] offsets.
    pub fn set_cursor(&mut self, offset: usize) {
        self.cursor = self.clamp_offset(offset);
    }

    /// 0-indexed line and byte column of the cursor.
    #[must_use]
    pub fn cursor_position(&self) -> CursorPos {
        let before = &self.text.as_bytes()[..self.cursor];
        let line = before.iter().filter(|&&b| b == b'\n').count();
        let line_start = before
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |nl| nl + 1);
        CursorPos::new(line as u32, (self.cursor - line_start) as u32)
    }

    /// Move the cursor to a 0-indexed line and byte column. A column past the
    /// end of the line stops at the line break; a line past the end stops at
    /// the end of the buffer.
    pub fn set_cursor_position(&mut self, pos: CursorPos) {
        let mut line_start = 0;
        for _ in 0..pos.line {
            match self.text[line_start..].find('\n') {
                Some(nl) => line_start += nl + 1,
                None => {
                    self.cursor = self.text.len();
                    return;
                }
            }
        }
        let line_end = self.text[line_start..]
            .find('\n')
            .map_or(self.text.len(), |nl| line_start + nl);
        let target = (line_start + pos.column as usize).min(line_end);
        self.cursor = self.clamp_offset(target);
    }

    fn after_history_move(&mut self) {
        self.dirty = true;
        self.cursor = self.clamp_offset(self.cursor);
    }

    fn clamp_offset(&self, offset: usize) -> usize {
        let mut offset = offset.min(self.text.len());
        while !self.text.is_char_boundary(offset) {
            offset -= 1;
        }
        offset
    }
}
