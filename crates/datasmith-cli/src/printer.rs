//! Incremental terminal rendering of turn events.

use std::io::{self, Write};

use datasmith_chat::{HistoryPage, TurnEnd, TurnEvent};

/// Prints a streaming reply as it grows.
///
/// Text updates carry the whole reply, so only the unseen suffix is written.
/// A corrective replacement reprints the reply on a new line.
pub struct Printer<W: Write> {
    out: W,
    printed: String,
    show_thoughts: bool,
}

impl<W: Write> Printer<W> {
    /// Create a printer writing to `out`.
    pub const fn new(out: W, show_thoughts: bool) -> Self {
        Self {
            out,
            printed: String::new(),
            show_thoughts,
        }
    }

    /// Render one event.
    pub fn handle(&mut self, event: &TurnEvent) -> io::Result<()> {
        match event {
            TurnEvent::Text(update) => {
                if let Some(suffix) = update.text.strip_prefix(self.printed.as_str()) {
                    write!(self.out, "{suffix}")?;
                } else {
                    write!(self.out, "\n{}", update.text)?;
                }
                self.printed.clone_from(&update.text);
            }
            TurnEvent::Thought(thought) if self.show_thoughts => {
                self.break_line()?;
                match &thought.tool {
                    Some(tool) => writeln!(self.out, "  [thought] {} ({tool})", thought.thought)?,
                    None => writeln!(self.out, "  [thought] {}", thought.thought)?,
                }
            }
            TurnEvent::Thought(_) => {}
            TurnEvent::File(file) => {
                self.break_line()?;
                let location = file
                    .url
                    .as_deref()
                    .or(file.id.as_ref().map(|id| id.as_str()))
                    .unwrap_or("unknown");
                writeln!(self.out, "  [file] {location}")?;
            }
            TurnEvent::RemoteError { error, .. } | TurnEvent::Failed(error) => {
                self.break_line()?;
                writeln!(self.out, "error: {error}")?;
            }
            TurnEvent::Completed(outcome) => {
                if outcome.end == TurnEnd::Stopped {
                    self.break_line()?;
                    writeln!(self.out, "[stopped]")?;
                } else if !self.printed.is_empty() {
                    writeln!(self.out)?;
                }
                self.printed.clear();
            }
        }
        self.out.flush()
    }

    /// Print suggested follow-up questions.
    pub fn suggestions(&mut self, questions: &[String]) -> io::Result<()> {
        if questions.is_empty() {
            return Ok(());
        }
        writeln!(self.out, "Suggested:")?;
        for (i, question) in questions.iter().enumerate() {
            writeln!(self.out, "  {}. {question}", i + 1)?;
        }
        self.out.flush()
    }

    /// Print a page of conversation history.
    pub fn history(&mut self, page: &HistoryPage) -> io::Result<()> {
        if page.data.is_empty() {
            writeln!(self.out, "(no history)")?;
        }
        for turn in &page.data {
            writeln!(self.out, "> {}", turn.query)?;
            writeln!(self.out, "{}", turn.answer)?;
        }
        if page.has_more {
            writeln!(self.out, "(older turns not shown)")?;
        }
        self.out.flush()
    }

    fn break_line(&mut self) -> io::Result<()> {
        if !self.printed.is_empty() && !self.printed.ends_with('\n') {
            writeln!(self.out)?;
            self.printed.push('\n');
        }
        Ok(())
    }
}
