//! Ticket kinds as a static dispatch table.
//!
//! Each entry carries everything the intake needs for one kind: the fields the
//! requester must fill, the settings key whose template is embedded in the
//! introduction, and the renderer for that introduction.

use std::collections::BTreeMap;

use crate::{
    domain::{Member, TicketKind},
    errors::Error,
    Result,
};

/// Text used when a guild has not configured the kind's template.
pub const SETTING_PLACEHOLDER: &str =
    "_No additional information has been configured for this server yet._";

pub type Fields = BTreeMap<String, String>;

#[derive(Debug)]
pub struct FieldSpec {
    pub key: &'static str,
    pub label: &'static str,
    pub placeholder: &'static str,
    /// Multi-line input on platforms that distinguish.
    pub long: bool,
}

/// Inputs to an introduction renderer.
pub struct IntroContext<'a> {
    pub requester: &'a Member,
    pub fields: &'a Fields,
    pub setting: &'a str,
}

pub struct KindSpec {
    pub kind: TicketKind,
    pub name: &'static str,
    pub title: &'static str,
    pub channel_prefix: &'static str,
    pub fields: &'static [FieldSpec],
    pub setting: &'static str,
    pub render: fn(&KindSpec, &IntroContext<'_>) -> String,
}

impl std::fmt::Debug for KindSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KindSpec")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

pub const KINDS: &[KindSpec] = &[
    KindSpec {
        kind: TicketKind::ScriptPurchase,
        name: "script",
        title: "Script purchase",
        channel_prefix: "script",
        fields: &[
            FieldSpec {
                key: "script",
                label: "Script name",
                placeholder: "Which script do you want to buy?",
                long: false,
            },
            FieldSpec {
                key: "uid",
                label: "UID",
                placeholder: "Your in-game UID",
                long: false,
            },
        ],
        setting: "cps",
        render: render_purchase,
    },
    KindSpec {
        kind: TicketKind::CurrencyPurchase,
        name: "currency",
        title: "Currency purchase",
        channel_prefix: "currency",
        fields: &[
            FieldSpec {
                key: "amount",
                label: "Amount",
                placeholder: "How much do you want to buy?",
                long: false,
            },
            FieldSpec {
                key: "payment",
                label: "Payment method",
                placeholder: "How will you pay?",
                long: false,
            },
        ],
        setting: "rate",
        render: render_purchase,
    },
    KindSpec {
        kind: TicketKind::Help,
        name: "help",
        title: "Help",
        channel_prefix: "help",
        fields: &[FieldSpec {
            key: "topic",
            label: "What do you need help with?",
            placeholder: "Describe your problem",
            long: true,
        }],
        setting: "help",
        render: render_help,
    },
];

pub fn spec(kind: TicketKind) -> &'static KindSpec {
    KINDS
        .iter()
        .find(|k| k.kind == kind)
        .unwrap_or(&KINDS[KINDS.len() - 1])
}

pub fn by_name(name: &str) -> Option<&'static KindSpec> {
    let name = name.trim();
    KINDS.iter().find(|k| k.name.eq_ignore_ascii_case(name))
}

impl KindSpec {
    /// Check every required field is present and non-blank.
    ///
    /// Returns the trimmed fields this kind knows about; unknown keys are dropped.
    pub fn validate(&self, fields: &Fields) -> Result<Fields> {
        let mut out = Fields::new();
        for f in self.fields {
            let value = fields.get(f.key).map(|v| v.trim()).unwrap_or("");
            if value.is_empty() {
                return Err(Error::Validation {
                    field: f.key.to_string(),
                });
            }
            out.insert(f.key.to_string(), value.to_string());
        }
        Ok(out)
    }

    pub fn render_intro(&self, requester: &Member, fields: &Fields, setting: Option<&str>) -> String {
        let setting = setting
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(SETTING_PLACEHOLDER);
        (self.render)(
            self,
            &IntroContext {
                requester,
                fields,
                setting,
            },
        )
    }

    fn field_lines(&self, fields: &Fields) -> String {
        self.fields
            .iter()
            .filter_map(|f| fields.get(f.key).map(|v| format!("**{}:** {v}", f.label)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn render_purchase(spec: &KindSpec, ctx: &IntroContext<'_>) -> String {
    format!(
        "🛒 {} opened a **{}** ticket.\n\n{}\n\n{}\n\nA staff member will confirm your order here. \
         Press **Close ticket** once you are done.",
        ctx.requester.mention(),
        spec.title,
        spec.field_lines(ctx.fields),
        ctx.setting,
    )
}

fn render_help(spec: &KindSpec, ctx: &IntroContext<'_>) -> String {
    format!(
        "🆘 {} needs help.\n\n{}\n\n{}\n\nPress **Close ticket** when your issue is solved.",
        ctx.requester.mention(),
        spec.field_lines(ctx.fields),
        ctx.setting,
    )
}
