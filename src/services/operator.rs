use anyhow::Result;
use inquire::{InquireError, Text};
use std::io::BufRead;

/// What the operator wants after reviewing a generated batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Advance,
    Quit,
    Retry(String),
}

impl Decision {
    /// `None` for blank input; end-of-input is handled by the caller as `Quit`.
    pub fn parse(input: &str) -> Option<Decision> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return None;
        }
        match trimmed.to_lowercase().as_str() {
            "quit" => Some(Decision::Quit),
            "y" => Some(Decision::Advance),
            _ => Some(Decision::Retry(trimmed.to_string())),
        }
    }
}

pub trait Operator: Send {
    /// One line of operator text, or `None` at end of input.
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>>;
    /// One line of progress text for the operator.
    fn notify(&mut self, line: &str);

    /// Reads until a non-blank line arrives. End of input counts as `Quit`.
    fn decide(&mut self, prompt: &str) -> Result<Decision> {
        loop {
            match self.read_line(prompt)? {
                None => return Ok(Decision::Quit),
                Some(line) => {
                    if let Some(decision) = Decision::parse(&line) {
                        return Ok(decision);
                    }
                }
            }
        }
    }
}

/// Terminal operator: `inquire` prompts on a TTY, plain stdin lines otherwise.
pub struct InquireOperator;

impl InquireOperator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for InquireOperator {
    fn default() -> Self {
        Self::new()
    }
}

impl Operator for InquireOperator {
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        match Text::new(prompt).prompt() {
            Ok(line) => Ok(Some(line)),
            Err(InquireError::OperationCanceled) | Err(InquireError::OperationInterrupted) => {
                Ok(None)
            }
            Err(InquireError::NotTTY) => {
                println!("{}", prompt);
                let mut line = String::new();
                let read = std::io::stdin().lock().read_line(&mut line)?;
                if read == 0 {
                    Ok(None)
                } else {
                    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn notify(&mut self, line: &str) {
        println!("{}", line);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays canned lines, then reports end of input. `notes` is shared so
    /// it can still be inspected after the operator is boxed into an engine.
    pub(crate) struct ScriptedOperator {
        pub lines: VecDeque<String>,
        pub notes: Arc<Mutex<Vec<String>>>,
        pub prompts: usize,
    }

    impl ScriptedOperator {
        pub(crate) fn new(lines: &[&str]) -> Self {
            Self {
                lines: lines.iter().map(|l| l.to_string()).collect(),
                notes: Arc::default(),
                prompts: 0,
            }
        }
    }

    impl Operator for ScriptedOperator {
        fn read_line(&mut self, _prompt: &str) -> Result<Option<String>> {
            self.prompts += 1;
            Ok(self.lines.pop_front())
        }

        fn notify(&mut self, line: &str) {
            self.notes.lock().unwrap().push(line.to_string());
        }
    }

    #[test]
    fn test_parse_decisions() {
        assert_eq!(Decision::parse("y"), Some(Decision::Advance));
        assert_eq!(Decision::parse("Y"), Some(Decision::Advance));
        assert_eq!(Decision::parse("QUIT"), Some(Decision::Quit));
        assert_eq!(Decision::parse("  quit \n"), Some(Decision::Quit));
        assert_eq!(
            Decision::parse("再写详细一点"),
            Some(Decision::Retry("再写详细一点".to_string()))
        );
        assert_eq!(Decision::parse("yes"), Some(Decision::Retry("yes".to_string())));
        assert_eq!(Decision::parse("   "), None);
    }

    #[test]
    fn test_decide_skips_blank_lines() -> Result<()> {
        let mut operator = ScriptedOperator::new(&["", "  ", "y"]);
        assert_eq!(operator.decide("?")?, Decision::Advance);
        assert_eq!(operator.prompts, 3);
        Ok(())
    }

    #[test]
    fn test_end_of_input_is_quit() -> Result<()> {
        let mut operator = ScriptedOperator::new(&[]);
        assert_eq!(operator.decide("?")?, Decision::Quit);
        Ok(())
    }
}
