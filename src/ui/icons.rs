use crate::object::ObjectType;

pub struct Icons;

impl Icons {
    pub const DATABASE: &str = "🗄️";
    pub const CHECK: &str = "✅";
    pub const CROSS: &str = "❌";
    pub const WARN: &str = "⚠️";
    pub const INFO: &str = "ℹ️";
    pub const LINK: &str = "🔗";
    pub const CLOCK: &str = "⏱️";
    pub const GEAR: &str = "⚙️";
    pub const PACKAGE: &str = "📦";
    pub const PERSON: &str = "👤";
    pub const FAMILY: &str = "👪";
    pub const EVENT: &str = "📅";
    pub const PLACE: &str = "📍";
    pub const SOURCE: &str = "📚";
    pub const CITATION: &str = "🔖";
    pub const MEDIA: &str = "🖼️";
    pub const REPOSITORY: &str = "🏛️";
    pub const NOTE: &str = "📝";
    pub const TAG: &str = "🏷️";
}

impl Icons {
    /// Icon shown next to records of a type
    pub fn for_type(obj_type: ObjectType) -> &'static str {
        match obj_type {
            ObjectType::Person => Self::PERSON,
            ObjectType::Family => Self::FAMILY,
            ObjectType::Event => Self::EVENT,
            ObjectType::Place => Self::PLACE,
            ObjectType::Source => Self::SOURCE,
            ObjectType::Citation => Self::CITATION,
            ObjectType::Media => Self::MEDIA,
            ObjectType::Repository => Self::REPOSITORY,
            ObjectType::Note => Self::NOTE,
            ObjectType::Tag => Self::TAG,
        }
    }
}
