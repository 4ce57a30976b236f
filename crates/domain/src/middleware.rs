//! 实体处理器的中间件管线
//!
//! 给定终端处理器 `H` 与中间件列表 `[M1, .., Mn]`，组合结果等价于
//! `M1(M2(..Mn(H)))`：列表头部的中间件最先进入、最后退出。
//! 同一套机制用于 Task、Job、Service、Node 四类实体。

use std::sync::Arc;

use async_trait::async_trait;
use conductor_core::ConductorResult;

/// 触发处理器的事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// 实体状态变化，处理器根据实体当前状态决定行为
    StateChange,
    /// 执行进度更新
    Progress,
    /// 节点心跳
    Heartbeat,
}

#[async_trait]
pub trait Handler<T: Send + 'static>: Send + Sync {
    async fn handle(&self, event: EventType, entity: &mut T) -> ConductorResult<()>;
}

pub type HandlerRef<T> = Arc<dyn Handler<T>>;

/// 拦截器：可以检查或修改实体，返回错误以短路，或通过 `next` 继续传递
#[async_trait]
pub trait Middleware<T: Send + 'static>: Send + Sync {
    async fn handle(&self, event: EventType, entity: &mut T, next: Next<'_, T>)
        -> ConductorResult<()>;
}

pub type MiddlewareRef<T> = Arc<dyn Middleware<T>>;

/// 管线中剩余的部分
pub struct Next<'a, T: Send + 'static> {
    rest: &'a [MiddlewareRef<T>],
    terminal: &'a dyn Handler<T>,
}

impl<'a, T: Send + 'static> Next<'a, T> {
    pub async fn run(self, event: EventType, entity: &mut T) -> ConductorResult<()> {
        match self.rest.split_first() {
            Some((head, rest)) => {
                let next = Next {
                    rest,
                    terminal: self.terminal,
                };
                head.handle(event, entity, next).await
            }
            None => self.terminal.handle(event, entity).await,
        }
    }
}

/// 组合后的处理器
pub struct Pipeline<T: Send + 'static> {
    middlewares: Vec<MiddlewareRef<T>>,
    terminal: HandlerRef<T>,
}

#[async_trait]
impl<T: Send + 'static> Handler<T> for Pipeline<T> {
    async fn handle(&self, event: EventType, entity: &mut T) -> ConductorResult<()> {
        let next = Next {
            rest: &self.middlewares,
            terminal: self.terminal.as_ref(),
        };
        next.run(event, entity).await
    }
}

/// 将中间件应用到处理器上；列表为空时直接返回原处理器
pub fn apply_middleware<T: Send + 'static>(
    handler: HandlerRef<T>,
    middlewares: Vec<MiddlewareRef<T>>,
) -> HandlerRef<T> {
    if middlewares.is_empty() {
        return handler;
    }
    Arc::new(Pipeline {
        middlewares,
        terminal: handler,
    })
}

/// 什么都不做的处理器
pub struct NoopHandler;

#[async_trait]
impl<T: Send + 'static> Handler<T> for NoopHandler {
    async fn handle(&self, _event: EventType, _entity: &mut T) -> ConductorResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use conductor_core::ConductorError;

    use super::*;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware<Vec<String>> for Recorder {
        async fn handle(
            &self,
            event: EventType,
            entity: &mut Vec<String>,
            next: Next<'_, Vec<String>>,
        ) -> ConductorResult<()> {
            self.log.lock().unwrap().push(format!("{}-before", self.name));
            entity.push(self.name.to_string());
            let result = next.run(event, entity).await;
            self.log.lock().unwrap().push(format!("{}-after", self.name));
            result
        }
    }

    struct Terminal {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Handler<Vec<String>> for Terminal {
        async fn handle(&self, _event: EventType, entity: &mut Vec<String>) -> ConductorResult<()> {
            self.log.lock().unwrap().push("H".to_string());
            entity.push("H".to_string());
            Ok(())
        }
    }

    struct Reject;

    #[async_trait]
    impl Middleware<Vec<String>> for Reject {
        async fn handle(
            &self,
            _event: EventType,
            _entity: &mut Vec<String>,
            _next: Next<'_, Vec<String>>,
        ) -> ConductorResult<()> {
            Err(ConductorError::InvalidState("rejected".to_string()))
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> MiddlewareRef<Vec<String>> {
        Arc::new(Recorder {
            name,
            log: Arc::clone(log),
        })
    }

    #[tokio::test]
    async fn test_composition_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = apply_middleware(
            Arc::new(Terminal {
                log: Arc::clone(&log),
            }),
            vec![recorder("A", &log), recorder("B", &log)],
        );

        let mut entity = Vec::new();
        handler
            .handle(EventType::StateChange, &mut entity)
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["A-before", "B-before", "H", "B-after", "A-after"]
        );
        assert_eq!(entity, vec!["A", "B", "H"]);
    }

    #[tokio::test]
    async fn test_empty_list_is_pass_through() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = apply_middleware(
            Arc::new(Terminal {
                log: Arc::clone(&log),
            }),
            Vec::new(),
        );

        let mut entity = Vec::new();
        handler
            .handle(EventType::StateChange, &mut entity)
            .await
            .unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["H"]);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_terminal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = apply_middleware(
            Arc::new(Terminal {
                log: Arc::clone(&log),
            }),
            vec![recorder("A", &log), Arc::new(Reject)],
        );

        let mut entity = Vec::new();
        let result = handler.handle(EventType::StateChange, &mut entity).await;

        assert!(result.is_err());
        assert_eq!(*log.lock().unwrap(), vec!["A-before", "A-after"]);
    }
}
