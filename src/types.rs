/// Firm reference number from the register.
/// Examples: `100425`, `117659`
pub type FirmReference = String;
/// Composite key shared by every line of one logical record.
/// Examples: `100014` (master list), `100014|117659` (appointment)
pub type GroupKey = String;
/// Hex SHA-256 digest used as the optimistic-concurrency version token.
/// Example: `3f9a…c21e` (64 hex characters)
pub type ContentHash = String;
/// Raw, unparsed line from a register extract.
/// Example: `100014|117659|Withdrawn|20011201|||||`
pub type RawLine = String;
/// Location of an extract file handed to the transport layer.
/// Example: `/data/extracts/appointments_20240301.txt`
pub type FileLocation = String;
/// Ordered field values produced by the field parser.
pub type Fields = Vec<String>;
