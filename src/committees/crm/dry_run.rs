use std::cell::{Cell, RefCell};

use serde_json::Value;
use tracing::info;

use super::{ApiResponse, CrmApi, Entity, Params, RecordExt};
use crate::committees::error::Result;
use crate::committees::model::CrmId;

/// Wraps another API, forwarding reads and recording writes instead of
/// performing them. Created records get negative placeholder IDs so later
/// steps of the run can refer to them.
pub struct DryRun<A> {
    inner: A,
    next_placeholder: Cell<CrmId>,
    planned: RefCell<Vec<(Entity, Params)>>,
}

impl<A: CrmApi> DryRun<A> {
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            next_placeholder: Cell::new(-1),
            planned: RefCell::new(Vec::new()),
        }
    }

    /// Writes that would have been sent, in order.
    pub fn planned_writes(&self) -> Vec<(Entity, Params)> {
        self.planned.borrow().clone()
    }
}

impl<A: CrmApi> CrmApi for DryRun<A> {
    fn call(&self, entity: Entity, action: &str, params: Params) -> Result<ApiResponse> {
        if action != "create" {
            return self.inner.call(entity, action, params);
        }

        let mut record = params.clone();
        let id = match params.id() {
            Some(id) => {
                info!(%entity, id, "dry run: would update");
                id
            }
            None => {
                let id = self.next_placeholder.get();
                self.next_placeholder.set(id - 1);
                record.insert("id".into(), Value::from(id));
                info!(%entity, placeholder = id, "dry run: would create");
                id
            }
        };
        self.planned.borrow_mut().push((entity, params));

        Ok(ApiResponse {
            count: 1,
            id: Some(id),
            values: vec![record],
        })
    }
}
