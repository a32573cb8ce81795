//! Onion-style middleware chain.
//!
//! Each layer gets the context and a [`Next`] for the rest of the chain. A
//! layer short-circuits by returning without calling [`Next::run`], or by
//! returning an error. The standard order is error handler, logging, rate
//! limiter, validator, then the terminal [`Handler`].

use std::sync::Arc;

use {async_trait::async_trait, stickerbot_common::Result};

use crate::context::MessageContext;

#[async_trait]
pub trait Middleware: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn handle(&self, ctx: &mut MessageContext, next: Next<'_>) -> Result<()>;
}

/// End of the chain.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: &mut MessageContext) -> Result<()>;
}

/// The remainder of the chain, as seen from one layer.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
    terminal: &'a dyn Handler,
}

impl Next<'_> {
    /// Run the remaining layers and the terminal handler.
    pub async fn run(self, ctx: &mut MessageContext) -> Result<()> {
        match self.rest.split_first() {
            Some((layer, rest)) => {
                layer
                    .handle(ctx, Next {
                        rest,
                        terminal: self.terminal,
                    })
                    .await
            },
            None => self.terminal.call(ctx).await,
        }
    }
}

/// Ordered layers in front of a terminal handler.
pub struct MiddlewareChain {
    layers: Vec<Arc<dyn Middleware>>,
    terminal: Arc<dyn Handler>,
}

impl MiddlewareChain {
    #[must_use]
    pub fn new(terminal: Arc<dyn Handler>) -> Self {
        Self {
            layers: Vec::new(),
            terminal,
        }
    }

    /// Append a layer; layers run in the order they were added.
    #[must_use]
    pub fn layer(mut self, layer: Arc<dyn Middleware>) -> Self {
        self.layers.push(layer);
        self
    }

    #[must_use]
    pub fn layer_names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|l| l.name()).collect()
    }

    pub async fn execute(&self, ctx: &mut MessageContext) -> Result<()> {
        Next {
            rest: &self.layers,
            terminal: self.terminal.as_ref(),
        }
        .run(ctx)
        .await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::context::Command,
        std::sync::Mutex,
        stickerbot_common::{Error, InboundMessage},
    };

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        stop: bool,
    }

    #[async_trait]
    impl Middleware for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn handle(&self, ctx: &mut MessageContext, next: Next<'_>) -> Result<()> {
            self.log.lock().unwrap().push(format!("{}:before", self.name));
            if self.stop {
                return Err(Error::validation("stopped"));
            }
            let result = next.run(ctx).await;
            self.log.lock().unwrap().push(format!("{}:after", self.name));
            result
        }
    }

    struct Terminal(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl Handler for Terminal {
        async fn call(&self, _ctx: &mut MessageContext) -> Result<()> {
            self.0.lock().unwrap().push("terminal".into());
            Ok(())
        }
    }

    fn ctx() -> MessageContext {
        MessageContext::new(InboundMessage::default(), Command::Text {
            text: "oi".into(),
        })
    }

    fn chain(log: &Arc<Mutex<Vec<String>>>, stop_second: bool) -> MiddlewareChain {
        MiddlewareChain::new(Arc::new(Terminal(log.clone())))
            .layer(Arc::new(Recorder {
                name: "a",
                log: log.clone(),
                stop: false,
            }))
            .layer(Arc::new(Recorder {
                name: "b",
                log: log.clone(),
                stop: stop_second,
            }))
    }

    #[tokio::test]
    async fn layers_wrap_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = chain(&log, false);
        assert_eq!(chain.layer_names(), vec!["a", "b"]);
        chain.execute(&mut ctx()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec![
            "a:before",
            "b:before",
            "terminal",
            "b:after",
            "a:after"
        ]);
    }

    #[tokio::test]
    async fn short_circuit_skips_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let err = chain(&log, true).execute(&mut ctx()).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(*log.lock().unwrap(), vec!["a:before", "b:before", "a:after"]);
    }
}
