mod create_chain;
mod inspect;
mod make_kdm;
mod verify;

pub use self::create_chain::CreateChainCommand;
pub use self::inspect::InspectCommand;
pub use self::make_kdm::MakeKdmCommand;
pub use self::verify::VerifyCommand;
