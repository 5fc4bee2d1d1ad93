//! Restartable reading: remember the last item handed out and skip past it
//! when the reader is reopened from a saved context.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::context::ExecutionContext;
use crate::error::{DomainError, DomainResult};

/// A source of items read one at a time, in a stable order.
pub trait ItemSource {
    type Item;

    /// `Ok(None)` when the input is exhausted.
    fn read_next(&mut self) -> anyhow::Result<Option<Self::Item>>;
}

/// Wraps an [`ItemSource`] and records the current item in an
/// [`ExecutionContext`] under `"<name>.item.current"`.
///
/// Lifecycle is explicit: [`TrackingReader::open`] restores state,
/// [`TrackingReader::checkpoint`] saves it, [`TrackingReader::close`] hands the
/// source back.
#[derive(Debug)]
pub struct TrackingReader<S: ItemSource> {
    source: S,
    key: String,
    current: Option<S::Item>,
    save_state: bool,
}

impl<S> TrackingReader<S>
where
    S: ItemSource,
    S::Item: Serialize + DeserializeOwned + PartialEq + Clone,
{
    pub fn open(source: S, name: &str, context: &ExecutionContext) -> anyhow::Result<Self> {
        Self::open_with(source, name, context, true)
    }

    /// With `save_state == false` the context is neither read nor written; use
    /// it when the reader is shared between threads or never restarted.
    pub fn open_with(
        source: S,
        name: &str,
        context: &ExecutionContext,
        save_state: bool,
    ) -> anyhow::Result<Self> {
        let mut reader = Self {
            source,
            key: format!("{name}.item.current"),
            current: None,
            save_state,
        };
        if !save_state {
            return Ok(reader);
        }

        let restored: Option<S::Item> = context.get(&reader.key)?;
        if let Some(item) = restored {
            reader.jump_to(&item)?;
        }
        Ok(reader)
    }

    fn jump_to(&mut self, item: &S::Item) -> anyhow::Result<()> {
        loop {
            match self.read()? {
                Some(read) if &read == item => return Ok(()),
                Some(_) => continue,
                None => {
                    return Err(DomainError::illegal_state(format!(
                        "checkpointed item under '{}' not found in source",
                        self.key
                    ))
                    .into());
                }
            }
        }
    }

    pub fn read(&mut self) -> anyhow::Result<Option<S::Item>> {
        let next = self.source.read_next()?;
        self.current = next.clone();
        Ok(next)
    }

    pub fn current(&self) -> Option<&S::Item> {
        self.current.as_ref()
    }

    /// Write the current item into `context`. A reader that has not read
    /// anything yet leaves the context untouched.
    pub fn checkpoint(&self, context: &mut ExecutionContext) -> DomainResult<()> {
        if !self.save_state {
            return Ok(());
        }
        match &self.current {
            Some(item) => context.put(self.key.clone(), item),
            None => Ok(()),
        }
    }

    pub fn close(self) -> S {
        self.source
    }
}
