use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormType {
    /// Asks the requester to fill in fields.
    Form,
    /// The requester's answers.
    Submit,
    /// Output of a finished command.
    Result,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldType {
    #[default]
    TextSingle,
    TextPrivate,
    TextMulti,
    ListSingle,
    ListMulti,
    Boolean,
    Fixed,
    Hidden,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormField {
    pub var: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: FieldType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default)]
    pub required: bool,
}

impl FormField {
    pub fn new(var: impl Into<String>, kind: FieldType) -> Self {
        Self {
            var: var.into(),
            label: None,
            kind,
            values: Vec::new(),
            options: Vec::new(),
            required: false,
        }
    }

    pub fn text_single(var: impl Into<String>) -> Self {
        Self::new(var, FieldType::TextSingle)
    }

    pub fn list_single(var: impl Into<String>) -> Self {
        Self::new(var, FieldType::ListSingle)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.values.push(value.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn first_value(&self) -> Option<&str> {
        self.values.first().map(String::as_str)
    }
}

/// A data form attached to a command stage, either as a question to the
/// requester or as the requester's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataForm {
    #[serde(rename = "type")]
    pub kind: FormType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default)]
    pub fields: Vec<FormField>,
}

impl DataForm {
    pub fn new(kind: FormType) -> Self {
        Self {
            kind,
            title: None,
            instructions: None,
            fields: Vec::new(),
        }
    }

    /// An empty answer, used when a requester continues without a form.
    pub fn empty_submit() -> Self {
        Self::new(FormType::Submit)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_field(mut self, field: FormField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn field(&self, var: &str) -> Option<&FormField> {
        self.fields.iter().find(|field| field.var == var)
    }

    pub fn first_value(&self, var: &str) -> Option<&str> {
        self.field(var).and_then(FormField::first_value)
    }

    /// Builds the submit form answering this one: every field keeps its
    /// `var` and type, and answers replace any default values.
    pub fn to_submit(&self) -> Self {
        Self {
            kind: FormType::Submit,
            title: None,
            instructions: None,
            fields: self
                .fields
                .iter()
                .filter(|field| field.kind != FieldType::Fixed)
                .map(|field| FormField {
                    var: field.var.clone(),
                    label: None,
                    kind: field.kind,
                    values: field.values.clone(),
                    options: Vec::new(),
                    required: false,
                })
                .collect(),
        }
    }

    /// Sets the single value of `var`, adding the field if needed.
    pub fn with_answer(mut self, var: &str, value: impl ToString) -> Self {
        let value = value.to_string();
        match self.fields.iter_mut().find(|field| field.var == var) {
            Some(field) => field.values = vec![value],
            None => self.fields.push(FormField::text_single(var).with_value(value)),
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteType {
    #[default]
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    #[serde(default, rename = "type")]
    pub kind: NoteType,
    pub text: String,
}

impl Note {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            kind: NoteType::Info,
            text: text.into(),
        }
    }

    pub fn warn(text: impl Into<String>) -> Self {
        Self {
            kind: NoteType::Warn,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: NoteType::Error,
            text: text.into(),
        }
    }
}
