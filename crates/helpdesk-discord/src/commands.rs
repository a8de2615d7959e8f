//! Slash command and modal builders, plus decoding of their submissions.

use serenity::all::{
    ActionRowComponent, CommandDataOption, CommandDataOptionValue, CommandOptionType,
    CreateActionRow, CreateCommand, CreateCommandOption, CreateInputText, CreateModal,
    InputTextStyle, ModalInteractionData,
};

use helpdesk_core::{
    commands::intake_form_id,
    kinds::{Fields, KindSpec, KINDS},
};

pub const TICKET: &str = "ticket";
pub const CLOSE: &str = "close";
pub const TRANSCRIPT: &str = "transcript";
pub const SETTING: &str = "setting";

pub fn slash_commands() -> Vec<CreateCommand> {
    let kind = KINDS.iter().fold(
        CreateCommandOption::new(CommandOptionType::String, "kind", "What the ticket is about")
            .required(true),
        |opt, k| opt.add_string_choice(k.title, k.name),
    );

    let setting_name = KINDS.iter().fold(
        CreateCommandOption::new(CommandOptionType::String, "name", "Which template to set")
            .required(true),
        |opt, k| opt.add_string_choice(k.setting, k.setting),
    );

    vec![
        CreateCommand::new(TICKET)
            .description("Open a support ticket")
            .add_option(kind),
        CreateCommand::new(CLOSE)
            .description("Close the ticket this channel belongs to")
            .add_option(CreateCommandOption::new(
                CommandOptionType::String,
                "reason",
                "Why the ticket is being closed",
            )),
        CreateCommand::new(TRANSCRIPT)
            .description("Fetch the transcript of a closed ticket (staff)")
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "ticket", "Ticket id")
                    .required(true),
            ),
        CreateCommand::new(SETTING)
            .description("Set a server template shown in new tickets (staff)")
            .add_option(setting_name)
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "text", "Template text")
                    .required(true),
            ),
    ]
}

/// The intake form for one kind. Its custom id carries the intake command.
pub fn intake_modal(spec: &KindSpec) -> CreateModal {
    let rows = spec
        .fields
        .iter()
        .map(|f| {
            let style = if f.long {
                InputTextStyle::Paragraph
            } else {
                InputTextStyle::Short
            };
            CreateActionRow::InputText(
                CreateInputText::new(style, f.label, f.key)
                    .placeholder(f.placeholder)
                    .required(true),
            )
        })
        .collect();
    CreateModal::new(intake_form_id(spec.kind), spec.title).components(rows)
}

pub fn modal_fields(data: &ModalInteractionData) -> Fields {
    data.components
        .iter()
        .flat_map(|row| row.components.iter())
        .filter_map(|c| match c {
            ActionRowComponent::InputText(input) => Some((
                input.custom_id.clone(),
                input.value.clone().unwrap_or_default(),
            )),
            _ => None,
        })
        .collect()
}

pub fn string_option(options: &[CommandDataOption], name: &str) -> Option<String> {
    options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| match &o.value {
            CommandDataOptionValue::String(s) => Some(s.clone()),
            _ => None,
        })
}
