pub struct Data {
    pub starboard: crate::helpers::starboard::Database,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;

pub type Context<'a> = poise::Context<'a, Data, Error>;
