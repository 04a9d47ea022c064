//! 结果聚合
//!
//! 把领域事件转换成效果，并按解析顺序保存结果列表。

use std::collections::HashSet;

use crate::config::DuplicatePolicy;
use crate::parser::DomainEvent;
use crate::types::ResultRecord;

/// 聚合效果
#[derive(Debug, Clone, PartialEq)]
pub enum AggregatorEffect {
    /// 进行中的命令旁白
    StatusUpdate(String),
    /// 新结果
    ResultAdded(ResultRecord),
    /// 搜索完成
    Completed,
    /// 无效果
    NoOp,
}

/// 结果聚合器
#[derive(Debug, Default)]
pub struct ResultAggregator {
    policy: DuplicatePolicy,
    results: Vec<ResultRecord>,
    seen: HashSet<String>,
    completed: bool,
}

impl ResultAggregator {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    /// 应用一个事件
    ///
    /// 完成之后的任何事件都不再产生效果。
    pub fn apply(&mut self, event: &DomainEvent) -> AggregatorEffect {
        if self.completed {
            tracing::trace!("聚合已完成，忽略事件: {}", event.name());
            return AggregatorEffect::NoOp;
        }

        match event {
            DomainEvent::PartialCommand { command, args } => {
                AggregatorEffect::StatusUpdate(narrate(command, args.iter()))
            }
            DomainEvent::CommandResult(payload) => {
                if payload.entity.is_empty() {
                    tracing::debug!("忽略 entity 为空的结果");
                    return AggregatorEffect::NoOp;
                }

                if self.policy == DuplicatePolicy::Dedup && !self.seen.insert(payload.entity.clone()) {
                    tracing::debug!("重复结果已跳过: {}", payload.entity);
                    return AggregatorEffect::NoOp;
                }

                let record = ResultRecord {
                    identifier: payload.entity.clone(),
                    kind: payload.kind.clone(),
                    description: payload.description.clone(),
                    relevance_score: payload.score,
                    properties: payload.properties.clone(),
                };
                self.results.push(record.clone());
                AggregatorEffect::ResultAdded(record)
            }
            DomainEvent::SearchComplete => {
                self.completed = true;
                AggregatorEffect::Completed
            }
            DomainEvent::Heartbeat | DomainEvent::Unknown { .. } | DomainEvent::Malformed { .. } => {
                AggregatorEffect::NoOp
            }
        }
    }

    /// 已聚合的结果（按到达顺序）
    pub fn results(&self) -> &[ResultRecord] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// 清空结果，准备下一次搜索
    pub fn reset(&mut self) {
        self.results.clear();
        self.seen.clear();
        self.completed = false;
    }
}

/// "searching (step=1)" 形式的旁白
fn narrate<'a>(command: &str, args: impl Iterator<Item = (&'a String, &'a String)>) -> String {
    let args: Vec<String> = args.map(|(k, v)| format!("{}={}", k, v)).collect();
    if args.is_empty() {
        command.to_string()
    } else {
        format!("{} ({})", command, args.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParseFailure;
    use crate::protocol::ResultPayload;
    use std::collections::BTreeMap;

    fn result(entity: &str) -> DomainEvent {
        DomainEvent::CommandResult(ResultPayload {
            entity: entity.to_string(),
            kind: "File".to_string(),
            description: None,
            score: Some(0.5),
            properties: None,
        })
    }

    #[test]
    fn test_result_added_keeps_identifier() {
        let mut aggregator = ResultAggregator::default();
        match aggregator.apply(&result("a.txt")) {
            AggregatorEffect::ResultAdded(record) => {
                assert_eq!(record.identifier, "a.txt");
                assert_eq!(record.kind, "File");
                assert_eq!(record.relevance_score, Some(0.5));
            }
            other => panic!("Expected ResultAdded, got {:?}", other),
        }
        assert_eq!(aggregator.len(), 1);
    }

    #[test]
    fn test_status_update_narration() {
        let mut aggregator = ResultAggregator::default();
        let mut args = BTreeMap::new();
        args.insert("step".to_string(), "1".to_string());
        args.insert("of".to_string(), "3".to_string());

        let effect = aggregator.apply(&DomainEvent::PartialCommand {
            command: "searching".to_string(),
            args,
        });
        assert_eq!(effect, AggregatorEffect::StatusUpdate("searching (of=3, step=1)".to_string()));

        let effect = aggregator.apply(&DomainEvent::PartialCommand {
            command: "ranking".to_string(),
            args: BTreeMap::new(),
        });
        assert_eq!(effect, AggregatorEffect::StatusUpdate("ranking".to_string()));
        // 旁白不是结果
        assert!(aggregator.is_empty());
    }

    #[test]
    fn test_empty_entity_is_noop() {
        let mut aggregator = ResultAggregator::default();
        assert_eq!(aggregator.apply(&result("")), AggregatorEffect::NoOp);
        assert!(aggregator.is_empty());
    }

    #[test]
    fn test_diagnostic_events_are_noop() {
        let mut aggregator = ResultAggregator::default();
        let malformed = DomainEvent::Malformed {
            name: "command_result".to_string(),
            raw: "data: {".to_string(),
            reason: ParseFailure::InvalidJson("EOF".to_string()),
        };
        let unknown = DomainEvent::Unknown {
            name: "message".to_string(),
            raw: String::new(),
        };
        assert_eq!(aggregator.apply(&malformed), AggregatorEffect::NoOp);
        assert_eq!(aggregator.apply(&unknown), AggregatorEffect::NoOp);
        assert_eq!(aggregator.apply(&DomainEvent::Heartbeat), AggregatorEffect::NoOp);
    }

    #[test]
    fn test_duplicates_appended_by_default() {
        let mut aggregator = ResultAggregator::new(DuplicatePolicy::Append);
        aggregator.apply(&result("a.txt"));
        aggregator.apply(&result("b.txt"));
        assert!(matches!(aggregator.apply(&result("a.txt")), AggregatorEffect::ResultAdded(_)));

        let ids: Vec<_> = aggregator.results().iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(ids, vec!["a.txt", "b.txt", "a.txt"]);
    }

    #[test]
    fn test_duplicates_dropped_with_dedup() {
        let mut aggregator = ResultAggregator::new(DuplicatePolicy::Dedup);
        aggregator.apply(&result("a.txt"));
        aggregator.apply(&result("b.txt"));
        assert_eq!(aggregator.apply(&result("a.txt")), AggregatorEffect::NoOp);

        let ids: Vec<_> = aggregator.results().iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(ids, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_nothing_after_completed() {
        let mut aggregator = ResultAggregator::default();
        aggregator.apply(&result("a.txt"));
        assert_eq!(aggregator.apply(&DomainEvent::SearchComplete), AggregatorEffect::Completed);
        assert!(aggregator.is_completed());

        assert_eq!(aggregator.apply(&result("late.txt")), AggregatorEffect::NoOp);
        assert_eq!(aggregator.apply(&DomainEvent::SearchComplete), AggregatorEffect::NoOp);
        assert_eq!(aggregator.len(), 1);

        aggregator.reset();
        assert!(!aggregator.is_completed());
        assert!(aggregator.is_empty());
    }
}
