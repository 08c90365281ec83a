//! Commands every server offers out of the box.

use beach_commands_core::{
    AllowedActions, CommandError, DataForm, FormField, FormType, NextStage, Note, PreviousStage,
    SpecificCondition,
};

use crate::handler::{
    HandlerKind, MultiStageCommand, SingleStageCommand, StageContext, StageReply,
};
use crate::registry::{CommandDescriptor, CommandRegistry};

pub fn register_builtins(registry: &CommandRegistry) {
    registry.register("ping", "Ping", |_: &CommandDescriptor| HandlerKind::single(Ping));
    registry.register("survey", "Quick survey", |_: &CommandDescriptor| {
        HandlerKind::multi(Survey::default())
    });
    registry.register("arith", "Arithmetic", |_: &CommandDescriptor| {
        HandlerKind::multi(Arith::default())
    });
}

/// Liveness probe.
#[derive(Debug, Default)]
pub struct Ping;

impl SingleStageCommand for Ping {
    fn execute(&mut self, _ctx: &StageContext<'_>) -> Result<StageReply, CommandError> {
        Ok(StageReply::finished().with_note(Note::info("pong")))
    }
}

/// Asks for a name, then a rating. Either stage may finish early.
#[derive(Debug, Default)]
pub struct Survey {
    name: Option<String>,
    rating: Option<String>,
}

impl Survey {
    fn name_stage(&self) -> StageReply {
        let mut field = FormField::text_single("name").with_label("Your name").required();
        if let Some(name) = &self.name {
            field = field.with_value(name.clone());
        }
        StageReply::stage(AllowedActions::for_stage(
            PreviousStage::None,
            NextStage::NonFinalOrComplete,
        ))
        .with_form(
            DataForm::new(FormType::Form)
                .with_title("Survey")
                .with_field(field),
        )
    }

    fn rating_stage(&self) -> StageReply {
        let mut field = FormField::list_single("rating")
            .with_label("How was it?")
            .with_option("good")
            .with_option("fine")
            .with_option("bad");
        if let Some(rating) = &self.rating {
            field = field.with_value(rating.clone());
        }
        StageReply::stage(AllowedActions::for_stage(
            PreviousStage::Exists,
            NextStage::Final,
        ))
        .with_form(
            DataForm::new(FormType::Form)
                .with_title("Survey")
                .with_field(field),
        )
    }

    fn record(&mut self, form: &DataForm) {
        if let Some(name) = form.first_value("name") {
            self.name = Some(name.to_string());
        }
        if let Some(rating) = form.first_value("rating") {
            self.rating = Some(rating.to_string());
        }
    }
}

impl MultiStageCommand for Survey {
    fn execute(&mut self, _ctx: &StageContext<'_>) -> Result<StageReply, CommandError> {
        Ok(self.name_stage())
    }

    fn next(
        &mut self,
        _ctx: &StageContext<'_>,
        form: &DataForm,
    ) -> Result<StageReply, CommandError> {
        self.record(form);
        if self.name.is_none() {
            return Err(CommandError::bad_payload("name is required"));
        }
        Ok(self.rating_stage())
    }

    fn prev(&mut self, _ctx: &StageContext<'_>) -> Result<StageReply, CommandError> {
        Ok(self.name_stage())
    }

    fn complete(
        &mut self,
        _ctx: &StageContext<'_>,
        form: &DataForm,
    ) -> Result<StageReply, CommandError> {
        self.record(form);
        let mut result = DataForm::new(FormType::Result).with_title("Survey");
        if let Some(name) = &self.name {
            result = result.with_answer("name", name);
        }
        if let Some(rating) = &self.rating {
            result = result.with_answer("rating", rating);
        }
        Ok(StageReply::finished()
            .with_form(result)
            .with_note(Note::info("thanks for taking part")))
    }

    fn cancel(&mut self, _ctx: &StageContext<'_>) {
        self.name = None;
        self.rating = None;
    }
}

/// Adds or subtracts two integers collected over three stages.
#[derive(Debug, Default)]
pub struct Arith {
    a: Option<i64>,
    b: Option<i64>,
}

impl Arith {
    /// The question asked on `stage`.
    fn stage_reply(&self, stage: u32) -> Result<StageReply, CommandError> {
        let reply = match stage {
            1 => StageReply::stage(AllowedActions::for_stage(
                PreviousStage::None,
                NextStage::NonFinal,
            ))
            .with_form(operand_form("a", self.a)),
            2 => StageReply::stage(AllowedActions::for_stage(
                PreviousStage::Exists,
                NextStage::NonFinal,
            ))
            .with_form(operand_form("b", self.b)),
            3 => StageReply::stage(AllowedActions::for_stage(
                PreviousStage::Exists,
                NextStage::Final,
            ))
            .with_form(
                DataForm::new(FormType::Form).with_title("Operation").with_field(
                    FormField::list_single("op")
                        .required()
                        .with_option("+")
                        .with_option("-"),
                ),
            ),
            _ => {
                return Err(CommandError::bad_request(SpecificCondition::BadAction)
                    .with_text(format!("no stage {stage}")))
            }
        };
        Ok(reply)
    }
}

fn operand_form(var: &str, current: Option<i64>) -> DataForm {
    let mut field = FormField::text_single(var)
        .with_label(format!("Variable {var}"))
        .required();
    if let Some(value) = current {
        field = field.with_value(value.to_string());
    }
    DataForm::new(FormType::Form)
        .with_title(format!("Variable {var}"))
        .with_field(field)
}

fn parse_operand(form: &DataForm, var: &str) -> Result<i64, CommandError> {
    let raw = form
        .first_value(var)
        .ok_or_else(|| CommandError::bad_payload(format!("missing {var}")))?;
    raw.trim()
        .parse()
        .map_err(|_| CommandError::bad_payload(format!("{var} must be an integer, got {raw:?}")))
}

impl MultiStageCommand for Arith {
    fn execute(&mut self, ctx: &StageContext<'_>) -> Result<StageReply, CommandError> {
        self.stage_reply(ctx.stage)
    }

    fn next(
        &mut self,
        ctx: &StageContext<'_>,
        form: &DataForm,
    ) -> Result<StageReply, CommandError> {
        // ctx.stage is the stage being entered; the form answers the one before.
        match ctx.stage {
            2 => self.a = Some(parse_operand(form, "a")?),
            3 => self.b = Some(parse_operand(form, "b")?),
            _ => return Err(CommandError::bad_request(SpecificCondition::BadAction)),
        }
        self.stage_reply(ctx.stage)
    }

    fn prev(&mut self, ctx: &StageContext<'_>) -> Result<StageReply, CommandError> {
        self.stage_reply(ctx.stage)
    }

    fn complete(
        &mut self,
        _ctx: &StageContext<'_>,
        form: &DataForm,
    ) -> Result<StageReply, CommandError> {
        let (Some(a), Some(b)) = (self.a, self.b) else {
            return Err(CommandError::bad_payload("operands missing"));
        };
        let result = match form.first_value("op") {
            Some("+") => a.checked_add(b),
            Some("-") => a.checked_sub(b),
            Some(other) => {
                return Err(CommandError::bad_payload(format!("unknown operation {other:?}")))
            }
            None => return Err(CommandError::bad_payload("missing op")),
        }
        .ok_or_else(|| CommandError::bad_payload("result overflows"))?;

        Ok(StageReply::finished().with_form(
            DataForm::new(FormType::Result)
                .with_title("Result")
                .with_answer("result", result),
        ))
    }

    fn cancel(&mut self, _ctx: &StageContext<'_>) {
        self.a = None;
        self.b = None;
    }
}
