//! Split and slot bookkeeping for the two work phases.
//!
//! [`ResourceManager`] owns the map phase's input splits, [`IdAllocator`]
//! the reduce phase's slot pool. Both drive the same [`SlotTable`] state
//! machine; the resource manager additionally carries the byte range each
//! split covers. Neither locks anything itself; the owning job tracker
//! serializes access.

use common::dfs::FileInfo;

use crate::core::master::TaskState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Pending,
    Allocated,
    Done,
}

/// Why an assignment request returned no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignDenied {
    /// Every slot is done; the phase has nothing left to hand out.
    NoMore,
    /// Work is outstanding but nothing can be handed out right now;
    /// the worker should back off and ask again.
    Suspend,
}

/// Outcome of absorbing a worker's completion report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finish {
    /// Report absorbed (including duplicate completions, which are
    /// acknowledged without re-mutating).
    Ok,
    /// Unknown slot number.
    NoSuchTask,
    /// Attempts exhausted with no success; the caller must fail the phase.
    Exhausted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub pending: u32,
    pub allocated: u32,
    pub done: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    no: i32,
    attempt: i32,
    status: SlotStatus,
    allocated: u32,
}

/// Assignment state for a dense pool of numbered slots.
///
/// Attempts are monotone per slot: a fresh slot hands out attempt 0, a retry
/// after failure hands out the next attempt id, and a speculative duplicate
/// of a slow attempt also claims a new id. `allocated` counts attempts that
/// have been handed out but not yet reported back.
#[derive(Debug, Clone)]
struct SlotTable {
    slots: Vec<Slot>,
    max_attempts: u32,
    done: u32,
}

impl SlotTable {
    fn new(total: usize, max_attempts: u32) -> Self {
        let slots = (0..total)
            .map(|no| Slot {
                no: no as i32,
                attempt: 0,
                status: SlotStatus::Pending,
                allocated: 0,
            })
            .collect();
        Self {
            slots,
            max_attempts: max_attempts.max(1),
            done: 0,
        }
    }

    fn assign(&mut self) -> Result<Slot, AssignDenied> {
        // Lowest pending number first.
        if let Some(slot) = self
            .slots
            .iter_mut()
            .find(|s| s.status == SlotStatus::Pending)
        {
            slot.status = SlotStatus::Allocated;
            slot.allocated += 1;
            return Ok(*slot);
        }
        if self.done as usize == self.slots.len() {
            return Err(AssignDenied::NoMore);
        }
        // Nothing pending: duplicate the lowest-numbered outstanding slot
        // that still has attempt budget, as a hedge against slow or lost
        // attempts.
        let max_attempts = self.max_attempts;
        if let Some(slot) = self.slots.iter_mut().find(|s| {
            s.status == SlotStatus::Allocated
                && s.allocated < max_attempts
                && ((s.attempt + 1) as u32) < max_attempts
        }) {
            slot.attempt += 1;
            slot.allocated += 1;
            return Ok(*slot);
        }
        Err(AssignDenied::Suspend)
    }

    fn finish(&mut self, no: i32, attempt: i32, state: TaskState) -> Finish {
        if no < 0 || no as usize >= self.slots.len() {
            return Finish::NoSuchTask;
        }
        let slot = &mut self.slots[no as usize];
        slot.allocated = slot.allocated.saturating_sub(1);
        // TaskState::Running never reaches here; the dispatch shim rejects it.
        if state == TaskState::Completed {
            if slot.status != SlotStatus::Done {
                slot.status = SlotStatus::Done;
                self.done += 1;
            }
            return Finish::Ok;
        }
        if slot.status == SlotStatus::Done {
            // A late failure report for a slot another attempt already won.
            return Finish::Ok;
        }
        if (attempt + 1) as u32 >= self.max_attempts {
            return Finish::Exhausted;
        }
        slot.status = SlotStatus::Pending;
        slot.attempt = slot.attempt.max(attempt) + 1;
        Finish::Ok
    }

    fn counts(&self) -> Counts {
        let mut counts = Counts {
            total: self.slots.len() as u32,
            ..Counts::default()
        };
        for slot in &self.slots {
            match slot.status {
                SlotStatus::Pending => counts.pending += 1,
                SlotStatus::Allocated => counts.allocated += 1,
                SlotStatus::Done => counts.done += 1,
            }
        }
        counts
    }

    fn is_finished(&self) -> bool {
        self.done as usize == self.slots.len()
    }

    /// Restore helper: force a slot to done without going through a report.
    fn mark_done(&mut self, no: i32, attempt: i32) {
        if no < 0 || no as usize >= self.slots.len() {
            return;
        }
        let slot = &mut self.slots[no as usize];
        if slot.status != SlotStatus::Done {
            slot.status = SlotStatus::Done;
            self.done += 1;
        }
        slot.attempt = slot.attempt.max(attempt);
    }
}

/// A contiguous byte range of one input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputChunk {
    pub input_file: String,
    pub offset: u64,
    pub size: u64,
}

/// A map split as handed to a worker.
#[derive(Debug, Clone)]
pub struct ResourceItem {
    pub no: i32,
    pub attempt: i32,
    pub status: SlotStatus,
    pub allocated: u32,
    pub input: InputChunk,
}

/// A reduce slot as handed to a worker.
#[derive(Debug, Clone)]
pub struct IdItem {
    pub no: i32,
    pub attempt: i32,
    pub status: SlotStatus,
    pub allocated: u32,
}

/// Owns the map phase's input splits.
#[derive(Debug, Clone)]
pub struct ResourceManager {
    table: SlotTable,
    inputs: Vec<InputChunk>,
}

impl ResourceManager {
    /// Chunks enumerated input files into splits of at most `split_size`
    /// bytes, numbered densely in enumeration order. Empty files still get
    /// one (empty) split so their presence is visible to the job.
    pub fn from_files(files: &[FileInfo], split_size: u64, max_attempts: u32) -> Self {
        let split_size = split_size.max(1);
        let mut inputs = vec![];
        for file in files {
            if file.size == 0 {
                inputs.push(InputChunk {
                    input_file: file.path.clone(),
                    offset: 0,
                    size: 0,
                });
                continue;
            }
            let mut offset = 0;
            while offset < file.size {
                let size = split_size.min(file.size - offset);
                inputs.push(InputChunk {
                    input_file: file.path.clone(),
                    offset,
                    size,
                });
                offset += size;
            }
        }
        Self {
            table: SlotTable::new(inputs.len(), max_attempts),
            inputs,
        }
    }

    /// Rebuilds a manager from a persisted input list, bypassing filesystem
    /// enumeration. All splits start pending; the caller replays completions.
    pub fn from_chunks(inputs: Vec<InputChunk>, max_attempts: u32) -> Self {
        Self {
            table: SlotTable::new(inputs.len(), max_attempts),
            inputs,
        }
    }

    pub fn assign(&mut self) -> Result<ResourceItem, AssignDenied> {
        let slot = self.table.assign()?;
        Ok(self.item(slot))
    }

    pub fn finish(&mut self, no: i32, attempt: i32, state: TaskState) -> Finish {
        self.table.finish(no, attempt, state)
    }

    pub fn counts(&self) -> Counts {
        self.table.counts()
    }

    pub fn is_finished(&self) -> bool {
        self.table.is_finished()
    }

    pub fn inputs(&self) -> &[InputChunk] {
        &self.inputs
    }

    pub fn dump(&self) -> Vec<ResourceItem> {
        self.table
            .slots
            .iter()
            .map(|slot| self.item(*slot))
            .collect()
    }

    pub fn mark_done(&mut self, no: i32, attempt: i32) {
        self.table.mark_done(no, attempt);
    }

    fn item(&self, slot: Slot) -> ResourceItem {
        ResourceItem {
            no: slot.no,
            attempt: slot.attempt,
            status: slot.status,
            allocated: slot.allocated,
            input: self.inputs[slot.no as usize].clone(),
        }
    }
}

/// Owns the reduce phase's slot pool, 0..R.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    table: SlotTable,
}

impl IdAllocator {
    pub fn new(total: u32, max_attempts: u32) -> Self {
        Self {
            table: SlotTable::new(total as usize, max_attempts),
        }
    }

    pub fn assign(&mut self) -> Result<IdItem, AssignDenied> {
        let slot = self.table.assign()?;
        Ok(IdItem {
            no: slot.no,
            attempt: slot.attempt,
            status: slot.status,
            allocated: slot.allocated,
        })
    }

    pub fn finish(&mut self, no: i32, attempt: i32, state: TaskState) -> Finish {
        self.table.finish(no, attempt, state)
    }

    pub fn counts(&self) -> Counts {
        self.table.counts()
    }

    pub fn is_finished(&self) -> bool {
        self.table.is_finished()
    }

    pub fn mark_done(&mut self, no: i32, attempt: i32) {
        self.table.mark_done(no, attempt);
    }
}
