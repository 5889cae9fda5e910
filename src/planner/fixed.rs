//! 固定批次 Planner：按顺序吐出预置的操作批次，用完后返回空（测试与离线演练用）

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::operations::{OperationCall, OperationDefinition};
use crate::planner::{Planner, PlannerError, Proposal};

/// 预置批次的 Planner；`repeat_last` 时最后一批无限重复
pub struct FixedPlanner {
    batches: Mutex<VecDeque<Vec<OperationCall>>>,
    repeat_last: bool,
    last: Mutex<Vec<OperationCall>>,
    calls: AtomicUsize,
}

impl FixedPlanner {
    pub fn new(batches: Vec<Vec<OperationCall>>) -> Self {
        Self {
            batches: Mutex::new(batches.into()),
            repeat_last: false,
            last: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// 永远返回同一批操作
    pub fn repeating(batch: Vec<OperationCall>) -> Self {
        Self {
            batches: Mutex::new(VecDeque::from(vec![batch])),
            repeat_last: true,
            last: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// 已被调用的次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Planner for FixedPlanner {
    async fn propose(
        &self,
        _goal: &str,
        _serialized_history: &str,
        _catalog: &[OperationDefinition],
    ) -> Result<Proposal, PlannerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .batches
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        let batch = match next {
            Some(batch) => {
                *last = batch.clone();
                batch
            }
            None if self.repeat_last => last.clone(),
            None => Vec::new(),
        };
        let raw = serde_json::to_string(&batch).unwrap_or_default();
        Ok(Proposal::new(batch, raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_batches_then_empty() {
        let planner = FixedPlanner::new(vec![vec![OperationCall::bare("a")]]);
        let first = planner.propose("g", "[]", &[]).await.unwrap();
        assert_eq!(first.operations.len(), 1);
        let second = planner.propose("g", "[]", &[]).await.unwrap();
        assert!(second.operations.is_empty());
        assert_eq!(planner.calls(), 2);
    }

    #[tokio::test]
    async fn test_repeating() {
        let planner = FixedPlanner::repeating(vec![OperationCall::bare("a")]);
        for _ in 0..3 {
            let p = planner.propose("g", "[]", &[]).await.unwrap();
            assert_eq!(p.operations, vec![OperationCall::bare("a")]);
        }
    }
}
