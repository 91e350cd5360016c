//! The sort engine.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use federa_buffer::BufferManager;
use federa_common::error::{FederaError, FederaResult};
use federa_common::types::{Row, Schema};
use federa_common::{MIN_PROCESSING_BATCHES, SORT_BUFFER_GROUP};
use tracing::{debug, trace};

use super::{ListComparator, SortMode};
use crate::buffer::{BufferCursor, TupleBuffer};
use crate::poll::{Poll, PollResult};
use crate::rows::TupleSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Reading,
    Done,
}

/// External multi-pass sort over buffer-manager runs.
///
/// The in-memory window holds `processor_batch_size *
/// max_processing_batches` rows; a merge pass combines at most
/// `max_processing_batches` runs into one. Both [`SortUtility::sort`] and
/// [`SortUtility::stream_distinct`] may suspend when their input does, and
/// continue from the same point when called again.
pub struct SortUtility {
    mode: SortMode,
    comparator: ListComparator,
    schema: Arc<Schema>,
    manager: Arc<dyn BufferManager>,
    batch_size: usize,
    window_rows: usize,
    fan_in: usize,
    phase: Phase,
    /// Rows read but not yet persisted. Sorted and unique in the
    /// distinct modes.
    window: Vec<Row>,
    /// Persisted runs, in creation order.
    runs: Vec<TupleBuffer>,
    /// Append-only output of the streaming distinct mode.
    output: Option<TupleBuffer>,
    output_staging: Vec<Row>,
    /// Unique rows found since the last progress report.
    fresh_rows: usize,
    merge_passes: usize,
}

impl SortUtility {
    /// Creates a sort engine.
    ///
    /// In the distinct modes the comparator is extended to every column so
    /// that equal rows are exact duplicates.
    pub fn new(
        mode: SortMode,
        comparator: ListComparator,
        schema: Arc<Schema>,
        manager: &Arc<dyn BufferManager>,
    ) -> Self {
        let comparator = if mode.is_distinct() {
            comparator.with_remaining_columns(schema.len())
        } else {
            comparator
        };
        let batch_size = manager.processor_batch_size().max(1);
        let batches = manager.max_processing_batches().max(MIN_PROCESSING_BATCHES);
        Self {
            mode,
            comparator,
            schema,
            manager: Arc::clone(manager),
            batch_size,
            window_rows: batch_size * batches,
            fan_in: batches,
            phase: Phase::Reading,
            window: Vec::new(),
            runs: Vec::new(),
            output: None,
            output_staging: Vec::new(),
            fresh_rows: 0,
            merge_passes: 0,
        }
    }

    /// Returns the mode.
    pub fn mode(&self) -> SortMode {
        self.mode
    }

    /// Returns the comparator in effect.
    pub fn comparator(&self) -> &ListComparator {
        &self.comparator
    }

    /// Returns the number of persisted runs.
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Returns the number of merge passes performed so far.
    pub fn merge_passes(&self) -> usize {
        self.merge_passes
    }

    /// Sorts the whole input and hands the single result run over.
    pub fn sort(&mut self, source: &mut dyn TupleSource) -> PollResult<TupleBuffer> {
        if self.phase == Phase::Done {
            return Err(FederaError::invariant("sort result was already taken"));
        }
        loop {
            if self.window.len() >= self.window_rows {
                self.spill_window()?;
            }
            match source.next_row()? {
                Poll::Pending => {
                    trace!(window = self.window.len(), runs = self.runs.len(), "sort input suspended");
                    return Ok(Poll::Pending);
                }
                Poll::Ready(Some(row)) => {
                    self.insert(row);
                }
                Poll::Ready(None) => break,
            }
        }

        if !self.window.is_empty() || self.runs.is_empty() {
            self.spill_window()?;
        }
        self.merge_all()?;
        self.phase = Phase::Done;
        let result = self
            .runs
            .pop()
            .ok_or_else(|| FederaError::invariant("sort finished without a result run"))?;
        debug!(
            mode = %self.mode,
            buffer_id = %result.id(),
            passes = self.merge_passes,
            "sort complete"
        );
        Ok(Poll::Ready(result))
    }

    /// Removes duplicates while the input is still arriving.
    ///
    /// Every distinct row is appended to [`SortUtility::output`] in arrival
    /// order as soon as it is known to be new. Returns `Ready(true)` once
    /// the input is exhausted, and `Ready(false)` when the input suspended
    /// after new rows were appended. Pending is returned only when the
    /// input suspended with nothing new to report.
    pub fn stream_distinct(&mut self, source: &mut dyn TupleSource) -> PollResult<bool> {
        if self.mode != SortMode::DistinctOnly {
            return Err(FederaError::invariant(format!(
                "streaming requires distinct mode, not {}",
                self.mode
            )));
        }
        if self.phase == Phase::Done {
            return Ok(Poll::Ready(true));
        }
        if self.output.is_none() {
            self.output = Some(TupleBuffer::create(
                &self.manager,
                Arc::clone(&self.schema),
                SORT_BUFFER_GROUP,
            )?);
        }

        loop {
            match source.next_row()? {
                Poll::Pending => {
                    self.flush_output()?;
                    if self.fresh_rows == 0 {
                        return Ok(Poll::Pending);
                    }
                    self.fresh_rows = 0;
                    return Ok(Poll::Ready(false));
                }
                Poll::Ready(Some(row)) => {
                    if self.is_confirmed(&row)? {
                        continue;
                    }
                    if let Err(pos) = self.search_window(&row) {
                        self.window.insert(pos, row.clone());
                        self.output_staging.push(row);
                        self.fresh_rows += 1;
                        if self.output_staging.len() >= self.batch_size {
                            self.flush_output()?;
                        }
                    }
                    if self.window.len() >= self.window_rows {
                        self.spill_window()?;
                        if self.runs.len() > self.fan_in {
                            self.merge_all()?;
                        }
                    }
                }
                Poll::Ready(None) => {
                    self.flush_output()?;
                    self.fresh_rows = 0;
                    self.phase = Phase::Done;
                    self.window.clear();
                    self.remove_runs()?;
                    return Ok(Poll::Ready(true));
                }
            }
        }
    }

    /// Returns the streaming output buffer.
    pub fn output(&self) -> Option<&TupleBuffer> {
        self.output.as_ref()
    }

    /// Hands the streaming output buffer over to the caller.
    pub fn take_output(&mut self) -> Option<TupleBuffer> {
        self.output.take()
    }

    /// Releases every run and the window.
    pub fn close(&mut self) -> FederaResult<()> {
        self.window.clear();
        self.output_staging.clear();
        let runs = self.remove_runs();
        let output = match self.output.as_mut() {
            Some(output) => output.remove(),
            None => Ok(()),
        };
        runs.and(output)
    }

    fn insert(&mut self, row: Row) {
        if self.mode.is_distinct() {
            if let Err(pos) = self.search_window(&row) {
                self.window.insert(pos, row);
            }
        } else {
            self.window.push(row);
        }
    }

    fn search_window(&self, row: &Row) -> Result<usize, usize> {
        self.window
            .binary_search_by(|probe| self.comparator.compare(probe, row))
    }

    /// Persists the window as one sorted run.
    fn spill_window(&mut self) -> FederaResult<()> {
        let mut rows = std::mem::take(&mut self.window);
        if !self.mode.is_distinct() {
            // slice::sort_by is stable, ties keep arrival order
            rows.sort_by(|a, b| self.comparator.compare(a, b));
        }
        let run = TupleBuffer::create(&self.manager, Arc::clone(&self.schema), SORT_BUFFER_GROUP)?;
        debug!(buffer_id = %run.id(), rows = rows.len(), runs = self.runs.len() + 1, "spilled sort run");
        run.append(rows)?;
        self.runs.push(run);
        Ok(())
    }

    /// Merges runs pass by pass until one remains.
    ///
    /// Each pass merges consecutive groups of at most `fan_in` runs, so a
    /// merged run only ever combines runs that were adjacent in arrival
    /// order. Together with taking the lowest run on ties this keeps the
    /// sort stable.
    fn merge_all(&mut self) -> FederaResult<()> {
        while self.runs.len() > 1 {
            let runs = std::mem::take(&mut self.runs);
            let before = runs.len();
            let mut merged = Vec::with_capacity(before / self.fan_in + 1);
            let mut remaining = runs.into_iter();
            loop {
                let mut group: Vec<TupleBuffer> = remaining.by_ref().take(self.fan_in).collect();
                match group.len() {
                    0 => break,
                    1 => merged.append(&mut group),
                    _ => merged.push(self.merge_group(group)?),
                }
            }
            self.runs = merged;
            self.merge_passes += 1;
            debug!(pass = self.merge_passes, before, after = self.runs.len(), "sort merge pass");
        }
        Ok(())
    }

    fn merge_group(&self, mut group: Vec<TupleBuffer>) -> FederaResult<TupleBuffer> {
        let out = TupleBuffer::create(&self.manager, Arc::clone(&self.schema), SORT_BUFFER_GROUP)?;
        let mut cursors: Vec<BufferCursor> = group.iter().map(TupleBuffer::cursor).collect();
        let mut heads = cursors
            .iter_mut()
            .map(BufferCursor::next_row)
            .collect::<FederaResult<Vec<_>>>()?;
        let mut staging = Vec::with_capacity(self.batch_size);
        let mut last: Option<Row> = None;

        while let Some(index) = self.min_head(&heads) {
            let Some(row) = heads[index].take() else {
                break;
            };
            heads[index] = cursors[index].next_row()?;
            if self.mode.is_distinct() {
                if let Some(previous) = &last {
                    if self.comparator.compare(previous, &row) == Ordering::Equal {
                        continue;
                    }
                }
                last = Some(row.clone());
            }
            staging.push(row);
            if staging.len() >= self.batch_size {
                out.append(std::mem::take(&mut staging))?;
            }
        }
        out.append(staging)?;

        for run in &mut group {
            run.remove()?;
        }
        Ok(out)
    }

    /// Index of the smallest head; the lowest index wins ties.
    fn min_head(&self, heads: &[Option<Row>]) -> Option<usize> {
        heads
            .iter()
            .enumerate()
            .filter_map(|(i, head)| head.as_ref().map(|row| (i, row)))
            .fold(None, |best: Option<(usize, &Row)>, (i, row)| match best {
                Some((_, current)) if self.comparator.compare(row, current) != Ordering::Less => {
                    best
                }
                _ => Some((i, row)),
            })
            .map(|(i, _)| i)
    }

    /// Returns true if a persisted run already holds `row`.
    fn is_confirmed(&self, row: &Row) -> FederaResult<bool> {
        for run in &self.runs {
            if self.run_contains(run, row)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn run_contains(&self, run: &TupleBuffer, row: &Row) -> FederaResult<bool> {
        let mut cursor = run.cursor();
        let (mut low, mut high) = (1, run.row_count()?);
        while low <= high {
            let mid = low + (high - low) / 2;
            let probe = cursor.row_at(mid)?.ok_or_else(|| {
                FederaError::invariant(format!("run {} lost row {mid}", run.id()))
            })?;
            match self.comparator.compare(&probe, row) {
                Ordering::Less => low = mid + 1,
                Ordering::Greater => high = mid - 1,
                Ordering::Equal => return Ok(true),
            }
        }
        Ok(false)
    }

    fn flush_output(&mut self) -> FederaResult<()> {
        if let Some(output) = &self.output {
            if !self.output_staging.is_empty() {
                output.append(std::mem::take(&mut self.output_staging))?;
            }
        }
        Ok(())
    }

    fn remove_runs(&mut self) -> FederaResult<()> {
        let mut first_error = None;
        for mut run in self.runs.drain(..) {
            if let Err(e) = run.remove() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for SortUtility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortUtility")
            .field("mode", &self.mode)
            .field("phase", &self.phase)
            .field("window", &self.window.len())
            .field("runs", &self.runs.len())
            .field("window_rows", &self.window_rows)
            .field("fan_in", &self.fan_in)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::VecSource;
    use crate::sort::SortKey;
    use crate::test_util::{buffer_manager, int_schema, DynBuffers, PausingSource};
    use federa_buffer::MemoryBufferManager;
    use federa_common::types::Value;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn keyed_rows(keys: &[i32]) -> Vec<Row> {
        keys.iter()
            .enumerate()
            .map(|(seq, k)| Row::new(vec![Value::Int(*k), Value::Int(seq as i32)]))
            .collect()
    }

    fn run_sort(
        manager: &Arc<MemoryBufferManager>,
        mode: SortMode,
        source: &mut dyn TupleSource,
    ) -> (Vec<Row>, usize) {
        let mut sorter = SortUtility::new(
            mode,
            ListComparator::ascending(&[0]),
            int_schema(2),
            &manager.dyn_ref(),
        );
        let mut pending = 0;
        let mut buffer = loop {
            match sorter.sort(source).unwrap() {
                Poll::Ready(buffer) => break buffer,
                Poll::Pending => pending += 1,
            }
        };
        let rows = buffer.read_all().unwrap();
        buffer.remove().unwrap();
        sorter.close().unwrap();
        (rows, pending)
    }

    #[test]
    fn test_sort_is_stable_across_passes() {
        let manager = buffer_manager(2);
        let mut rng = StdRng::seed_from_u64(7);
        let keys: Vec<i32> = (0..57).map(|_| rng.gen_range(0..6)).collect();
        let input = keyed_rows(&keys);

        let (rows, _) = run_sort(&manager, SortMode::Sort, &mut VecSource::new(input.clone()));

        let mut expected = input;
        expected.sort_by_key(|r| r.value(0).clone());
        assert_eq!(rows, expected);

        let stats = manager.stats();
        assert_eq!(stats.created, stats.removed);
        assert!(stats.created > 3);
    }

    #[test]
    fn test_distinct_modes() {
        let manager = buffer_manager(2);
        let input: Vec<Row> = [5, 3, 5, 1, 3, 3, 9, 1, 0, 5]
            .iter()
            .map(|k| Row::new(vec![Value::Int(*k), Value::Int(0)]))
            .collect();
        let expected: Vec<Row> = [0, 1, 3, 5, 9]
            .iter()
            .map(|k| Row::new(vec![Value::Int(*k), Value::Int(0)]))
            .collect();

        let (rows, _) = run_sort(
            &manager,
            SortMode::DistinctAndSort,
            &mut VecSource::new(input.clone()),
        );
        assert_eq!(rows, expected);

        let (mut rows, _) = run_sort(&manager, SortMode::DistinctOnly, &mut VecSource::new(input));
        rows.sort_by(|a, b| a.values().cmp(b.values()));
        assert_eq!(rows, expected);
    }

    #[test]
    fn test_sort_resumes_after_suspension() {
        let manager = buffer_manager(2);
        let keys: Vec<i32> = (0..23).map(|i| (i * 7) % 5).collect();
        let (steady, _) = run_sort(&manager, SortMode::Sort, &mut VecSource::new(keyed_rows(&keys)));
        let (paused, pending) = run_sort(
            &manager,
            SortMode::Sort,
            &mut PausingSource::new(keyed_rows(&keys), 3),
        );
        assert!(pending > 0);
        assert_eq!(steady, paused);
    }

    #[test]
    fn test_empty_input() {
        let manager = buffer_manager(2);
        let (rows, _) = run_sort(&manager, SortMode::Sort, &mut VecSource::new(Vec::new()));
        assert!(rows.is_empty());
        assert_eq!(manager.stats().live(), 0);
    }

    #[test]
    fn test_descending_keys() {
        let manager = buffer_manager(3);
        let mut sorter = SortUtility::new(
            SortMode::Sort,
            ListComparator::new(vec![SortKey::desc(0)]),
            int_schema(2),
            &manager.dyn_ref(),
        );
        let mut source = VecSource::new(keyed_rows(&[1, 4, 2, 4]));
        let Poll::Ready(buffer) = sorter.sort(&mut source).unwrap() else {
            panic!("in-memory input never suspends");
        };
        let keys: Vec<Value> = buffer
            .read_all()
            .unwrap()
            .iter()
            .map(|r| r.value(0).clone())
            .collect();
        assert_eq!(keys, vec![Value::Int(4), Value::Int(4), Value::Int(2), Value::Int(1)]);
        assert!(sorter.sort(&mut source).is_err());
    }

    #[test]
    fn test_stream_distinct_reports_progress() {
        let manager = buffer_manager(2);
        let mut sorter = SortUtility::new(
            SortMode::DistinctOnly,
            ListComparator::default(),
            int_schema(1),
            &manager.dyn_ref(),
        );
        let input: Vec<Row> = [3, 1, 3, 2, 1, 4, 4, 5, 6, 7, 8, 1, 9, 2]
            .iter()
            .map(|k| Row::new(vec![Value::Int(*k)]))
            .collect();
        let mut source = PausingSource::new(input, 4);

        let mut seen_progress = false;
        loop {
            match sorter.stream_distinct(&mut source).unwrap() {
                Poll::Ready(true) => break,
                Poll::Ready(false) => seen_progress = true,
                Poll::Pending => {}
            }
        }
        assert!(seen_progress);

        let rows = sorter.output().unwrap().read_all().unwrap();
        let keys: Vec<Value> = rows.iter().map(|r| r.value(0).clone()).collect();
        let expected: Vec<Value> = [3, 1, 2, 4, 5, 6, 7, 8, 9].iter().map(|k| Value::Int(*k)).collect();
        assert_eq!(keys, expected);

        sorter.close().unwrap();
        assert_eq!(manager.stats().live(), 0);
    }

    #[test]
    fn test_streaming_requires_distinct_mode() {
        let manager = buffer_manager(2);
        let mut sorter = SortUtility::new(
            SortMode::Sort,
            ListComparator::default(),
            int_schema(1),
            &manager.dyn_ref(),
        );
        assert!(sorter.stream_distinct(&mut VecSource::new(Vec::new())).is_err());
    }
}
