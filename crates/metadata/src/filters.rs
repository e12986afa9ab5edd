//! Named filters over `template_store_ref`.
//!
//! Every access pattern used to select association records is one variant of
//! [`AssociationFilter`]. A filter renders to a SQL predicate for the store and can
//! also be evaluated against an in-memory row, so each one can be checked on its own.
//! Filters exclude destroyed rows unless they say otherwise.

use crate::models::TemplateStoreRow;
use depot_core::{DataStoreRole, DownloadStatus, ObjectState, StoreId, TemplateId};

/// Which rows a filter admits with respect to the soft-delete marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Only rows with `destroyed = false`.
    Live,
    /// Only rows with `destroyed = true`.
    Destroyed,
    /// Both.
    Any,
}

impl Liveness {
    fn admits(self, destroyed: bool) -> bool {
        match self {
            Self::Live => !destroyed,
            Self::Destroyed => destroyed,
            Self::Any => true,
        }
    }
}

/// A bound value in a rendered predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlParam {
    Int(i64),
    Text(&'static str),
}

/// A rendered SQL `WHERE` clause (without the keyword) and its positional parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

#[derive(Default)]
struct PredicateBuilder {
    clauses: Vec<String>,
    params: Vec<SqlParam>,
}

impl PredicateBuilder {
    fn int(mut self, column: &str, value: i64) -> Self {
        self.clauses.push(format!("{column} = ?"));
        self.params.push(SqlParam::Int(value));
        self
    }

    fn text(mut self, column: &str, value: &'static str) -> Self {
        self.clauses.push(format!("{column} = ?"));
        self.params.push(SqlParam::Text(value));
        self
    }

    fn text_in(mut self, column: &str, values: impl ExactSizeIterator<Item = &'static str>) -> Self {
        if values.len() == 0 {
            // Empty membership set matches nothing.
            self.clauses.push("0".to_string());
            return self;
        }
        let placeholders: Vec<&str> = (0..values.len()).map(|_| "?").collect();
        self.clauses
            .push(format!("{column} IN ({})", placeholders.join(", ")));
        self.params.extend(values.map(SqlParam::Text));
        self
    }

    fn raw(mut self, clause: &str) -> Self {
        self.clauses.push(clause.to_string());
        self
    }

    fn liveness(self, liveness: Liveness) -> Self {
        match liveness {
            Liveness::Live => self.raw("destroyed = 0"),
            Liveness::Destroyed => self.raw("destroyed = 1"),
            Liveness::Any => self,
        }
    }

    fn build(self) -> Predicate {
        let sql = if self.clauses.is_empty() {
            "1".to_string()
        } else {
            self.clauses.join(" AND ")
        };
        Predicate {
            sql,
            params: self.params,
        }
    }
}

/// The fixed set of predicates used to select association records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationFilter<'a> {
    /// Records on a store.
    ByStore {
        store_id: StoreId,
        liveness: Liveness,
    },
    /// Live, referenced (`ref_cnt != 0`) records on a store. Not eligible for eviction.
    ActiveOnCache { store_id: StoreId },
    /// Records of a template.
    ByTemplate {
        template_id: TemplateId,
        liveness: Liveness,
    },
    /// Live records with a role, across all templates and stores.
    ByRole { role: DataStoreRole },
    /// Live records of a template with a role, optionally in a given state.
    ByTemplateRole {
        template_id: TemplateId,
        role: DataStoreRole,
        state: Option<ObjectState>,
    },
    /// Live records of a template on a store.
    ByTemplateStore {
        template_id: TemplateId,
        store_id: StoreId,
    },
    /// Live records of a template on a store whose state is in `states`.
    ByTemplateStoreStates {
        template_id: TemplateId,
        store_id: StoreId,
        states: &'a [ObjectState],
    },
    /// Live records of a template on a store whose download status is in `statuses`.
    ByTemplateStoreDownloadStatuses {
        template_id: TemplateId,
        store_id: StoreId,
        statuses: &'a [DownloadStatus],
    },
}

impl<'a> AssociationFilter<'a> {
    pub fn by_store(store_id: StoreId) -> Self {
        Self::ByStore {
            store_id,
            liveness: Liveness::Live,
        }
    }

    /// Records on a store whose destroyed flag equals `destroyed`.
    pub fn by_store_including_destroyed(store_id: StoreId, destroyed: bool) -> Self {
        Self::ByStore {
            store_id,
            liveness: if destroyed {
                Liveness::Destroyed
            } else {
                Liveness::Live
            },
        }
    }

    /// Every record on a store, destroyed or not.
    pub fn by_store_any(store_id: StoreId) -> Self {
        Self::ByStore {
            store_id,
            liveness: Liveness::Any,
        }
    }

    pub fn active_on_cache(store_id: StoreId) -> Self {
        Self::ActiveOnCache { store_id }
    }

    pub fn by_template(template_id: TemplateId) -> Self {
        Self::ByTemplate {
            template_id,
            liveness: Liveness::Live,
        }
    }

    /// Every record of a template, destroyed or not.
    pub fn by_template_any(template_id: TemplateId) -> Self {
        Self::ByTemplate {
            template_id,
            liveness: Liveness::Any,
        }
    }

    pub fn by_role(role: DataStoreRole) -> Self {
        Self::ByRole { role }
    }

    pub fn by_template_role(
        template_id: TemplateId,
        role: DataStoreRole,
        state: Option<ObjectState>,
    ) -> Self {
        Self::ByTemplateRole {
            template_id,
            role,
            state,
        }
    }

    pub fn by_template_store(template_id: TemplateId, store_id: StoreId) -> Self {
        Self::ByTemplateStore {
            template_id,
            store_id,
        }
    }

    pub fn by_template_store_states(
        template_id: TemplateId,
        store_id: StoreId,
        states: &'a [ObjectState],
    ) -> Self {
        Self::ByTemplateStoreStates {
            template_id,
            store_id,
            states,
        }
    }

    pub fn by_template_store_download_statuses(
        template_id: TemplateId,
        store_id: StoreId,
        statuses: &'a [DownloadStatus],
    ) -> Self {
        Self::ByTemplateStoreDownloadStatuses {
            template_id,
            store_id,
            statuses,
        }
    }

    /// Render the filter as a SQL predicate over `template_store_ref`.
    pub fn predicate(&self) -> Predicate {
        let builder = PredicateBuilder::default();
        let builder = match *self {
            Self::ByStore { store_id, liveness } => {
                builder.int("store_id", store_id).liveness(liveness)
            }
            Self::ActiveOnCache { store_id } => builder
                .int("store_id", store_id)
                .liveness(Liveness::Live)
                .raw("ref_cnt != 0"),
            Self::ByTemplate {
                template_id,
                liveness,
            } => builder.int("template_id", template_id).liveness(liveness),
            Self::ByRole { role } => builder
                .text("store_role", role.as_str())
                .liveness(Liveness::Live),
            Self::ByTemplateRole {
                template_id,
                role,
                state,
            } => {
                let builder = builder
                    .int("template_id", template_id)
                    .text("store_role", role.as_str())
                    .liveness(Liveness::Live);
                match state {
                    Some(state) => builder.text("state", state.as_str()),
                    None => builder,
                }
            }
            Self::ByTemplateStore {
                template_id,
                store_id,
            } => builder
                .int("template_id", template_id)
                .int("store_id", store_id)
                .liveness(Liveness::Live),
            Self::ByTemplateStoreStates {
                template_id,
                store_id,
                states,
            } => builder
                .int("template_id", template_id)
                .int("store_id", store_id)
                .text_in("state", states.iter().map(|s| s.as_str()))
                .liveness(Liveness::Live),
            Self::ByTemplateStoreDownloadStatuses {
                template_id,
                store_id,
                statuses,
            } => builder
                .int("template_id", template_id)
                .int("store_id", store_id)
                .text_in("download_state", statuses.iter().map(|s| s.as_str()))
                .liveness(Liveness::Live),
        };
        builder.build()
    }

    /// Evaluate the filter against an in-memory row.
    pub fn matches(&self, row: &TemplateStoreRow) -> bool {
        match *self {
            Self::ByStore { store_id, liveness } => {
                row.store_id == store_id && liveness.admits(row.destroyed)
            }
            Self::ActiveOnCache { store_id } => {
                row.store_id == store_id && !row.destroyed && row.ref_cnt != 0
            }
            Self::ByTemplate {
                template_id,
                liveness,
            } => row.template_id == template_id && liveness.admits(row.destroyed),
            Self::ByRole { role } => row.store_role == role.as_str() && !row.destroyed,
            Self::ByTemplateRole {
                template_id,
                role,
                state,
            } => {
                row.template_id == template_id
                    && row.store_role == role.as_str()
                    && !row.destroyed
                    && state.is_none_or(|s| row.state == s.as_str())
            }
            Self::ByTemplateStore {
                template_id,
                store_id,
            } => row.template_id == template_id && row.store_id == store_id && !row.destroyed,
            Self::ByTemplateStoreStates {
                template_id,
                store_id,
                states,
            } => {
                row.template_id == template_id
                    && row.store_id == store_id
                    && !row.destroyed
                    && states.iter().any(|s| row.state == s.as_str())
            }
            Self::ByTemplateStoreDownloadStatuses {
                template_id,
                store_id,
                statuses,
            } => {
                row.template_id == template_id
                    && row.store_id == store_id
                    && !row.destroyed
                    && statuses.iter().any(|s| row.download_state == s.as_str())
            }
        }
    }
}
