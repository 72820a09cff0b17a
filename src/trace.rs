use crate::{
    bson::{Bson, Document},
    sdam::ClusterDescription,
    selection_criteria::SelectionCriteria,
};

pub(crate) const COMMAND_TRACING_EVENT_TARGET: &str = "mongodb_executor::command";
pub(crate) const CONNECTION_TRACING_EVENT_TARGET: &str = "mongodb_executor::connection";
pub(crate) const SERVER_SELECTION_TRACING_EVENT_TARGET: &str =
    "mongodb_executor::server_selection";

pub(crate) trait TracingRepresentation {
    type Representation;

    fn tracing_representation(&self) -> Self::Representation;
}

impl TracingRepresentation for Document {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        Bson::Document(self.clone())
            .into_relaxed_extjson()
            .to_string()
    }
}

impl TracingRepresentation for crate::error::Error {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        self.to_string()
    }
}

impl TracingRepresentation for SelectionCriteria {
    type Representation = String;

    fn tracing_representation(&self) -> Self::Representation {
        self.to_string()
    }
}

impl TracingRepresentation for ClusterDescription {
    type Representation = String;

    fn tracing_representation(&self) -> Self::Representation {
        self.to_string()
    }
}
