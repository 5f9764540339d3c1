pub use crate::config::*;

/// A builder for assembling a poll.
///
/// Options are presented (and tallied) in the order they are added.
///
/// ```
/// pub use poll_flow::builder::Builder;
/// pub use poll_flow::PollRules;
/// # use poll_flow::FlowErrors;
///
/// let poll = Builder::new(&PollRules::DEFAULT_RULES)?
///     .option("Alumia", "First proposal")?
///     .option("Lumia", "Second proposal")?
///     .build()?;
///
/// assert_eq!(poll.options().len(), 2);
/// # Ok::<(), FlowErrors>(())
/// ```
pub struct Builder {
    pub(crate) _rules: PollRules,
    pub(crate) _options: Vec<PollOption>,
}

impl Builder {
    pub fn new(rules: &PollRules) -> Result<Builder, FlowErrors> {
        Ok(Builder {
            _rules: *rules,
            _options: Vec::new(),
        })
    }

    /// Adds an option.
    ///
    /// The name is trimmed. Blank and duplicate names are rejected.
    pub fn option(mut self, name: &str, description: &str) -> Result<Builder, FlowErrors> {
        let name = name.trim();
        if name.is_empty() {
            return Err(FlowErrors::BlankOption);
        }
        if self._options.iter().any(|o| o.name == name) {
            return Err(FlowErrors::DuplicateOption(name.to_string()));
        }
        self._options.push(PollOption {
            name: name.to_string(),
            description: description.to_string(),
        });
        Ok(self)
    }

    pub fn build(self) -> Result<Poll, FlowErrors> {
        if self._options.is_empty() {
            return Err(FlowErrors::EmptyPoll);
        }
        if self._rules.cooldown_seconds == 0 {
            return Err(FlowErrors::ZeroCooldown);
        }
        Ok(Poll {
            options: self._options,
            rules: self._rules,
        })
    }
}
