use std::sync::Arc;

use super::SignerEth;
use crate::context::{ContextModule, ContextModuleBuilder};
use crate::dmk::{DeviceManagementKit, SessionId};
use crate::error::ConnectorResult;

/// Builds a [`SignerEth`] bound to one session
pub struct SignerEthBuilder {
    dmk: Arc<DeviceManagementKit>,
    session_id: SessionId,
    origin_token: String,
    context_module: Option<Arc<dyn ContextModule>>,
}

impl SignerEthBuilder {
    pub fn new(
        dmk: Arc<DeviceManagementKit>,
        session_id: SessionId,
        origin_token: impl Into<String>,
    ) -> Self {
        Self {
            dmk,
            session_id,
            origin_token: origin_token.into(),
            context_module: None,
        }
    }

    pub fn with_context_module(mut self, context_module: Arc<dyn ContextModule>) -> Self {
        self.context_module = Some(context_module);
        self
    }

    /// Without an explicit context module, one is built from the default
    /// configuration and the origin token
    pub fn build(self) -> ConnectorResult<SignerEth> {
        let context_module = match self.context_module {
            Some(module) => module,
            None => Arc::new(ContextModuleBuilder::new(self.origin_token).build()?),
        };

        Ok(SignerEth {
            dmk: self.dmk,
            session_id: self.session_id,
            context_module,
        })
    }
}
