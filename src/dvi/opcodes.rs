//! Opcode and magic-number constants for the DVI, VF and PK formats

// DVI op codes
pub const SET_CHAR_0: u8 = 0;
pub const SET_CHAR_127: u8 = 127;
pub const SET1: u8 = 128; // typeset a char with a 1..4 byte code, then advance
pub const SET2: u8 = 129;
pub const SET3: u8 = 130;
pub const SET4: u8 = 131;
pub const SET_RULE: u8 = 132; // height and width, 4 bytes each, then advance
pub const PUT1: u8 = 133; // like SET1 but the point does not move
pub const PUT2: u8 = 134;
pub const PUT3: u8 = 135;
pub const PUT4: u8 = 136;
pub const PUT_RULE: u8 = 137;
pub const NOP: u8 = 138;
pub const BOP: u8 = 139; // 10 count registers and a pointer to the previous BOP
pub const EOP: u8 = 140;
pub const PUSH: u8 = 141;
pub const POP: u8 = 142;
pub const RIGHT1: u8 = 143;
pub const RIGHT4: u8 = 146;
pub const W0: u8 = 147;
pub const W1: u8 = 148;
pub const W4: u8 = 151;
pub const X0: u8 = 152;
pub const X1: u8 = 153;
pub const X4: u8 = 156;
pub const DOWN1: u8 = 157;
pub const DOWN4: u8 = 160;
pub const Y0: u8 = 161;
pub const Y1: u8 = 162;
pub const Y4: u8 = 165;
pub const Z0: u8 = 166;
pub const Z1: u8 = 167;
pub const Z4: u8 = 170;
pub const FNT_NUM_0: u8 = 171;
pub const FNT_NUM_63: u8 = 234;
pub const FNT1: u8 = 235;
pub const FNT4: u8 = 238;
pub const XXX1: u8 = 239; // special, 1..4 byte length followed by the bytes
pub const XXX4: u8 = 242;
pub const FNT_DEF1: u8 = 243;
pub const FNT_DEF4: u8 = 246;
pub const PRE: u8 = 247;
pub const POST: u8 = 248;
pub const POST_POST: u8 = 249;

pub const DVI_ID: u8 = 2;
pub const TRAILER: u8 = 223;

/// Size of the BOP parameter block: ten counts plus the back pointer
pub const BOP_PARAMS_LEN: usize = 11 * 4;

// VF
pub const VF_ID: u8 = 202;
pub const VF_LONG_CHAR: u8 = 242;
pub const VF_MAGIC: u16 = ((PRE as u16) << 8) + VF_ID as u16;

// PK
pub const PK_ID: u8 = 89;
pub const PK_CMD_START: u8 = 240;
pub const PK_X1: u8 = 240;
pub const PK_X4: u8 = 243;
pub const PK_Y: u8 = 244;
pub const PK_POST: u8 = 245;
pub const PK_NOOP: u8 = 246;
pub const PK_PRE: u8 = 247;
pub const PK_MAGIC: u16 = ((PK_PRE as u16) << 8) + PK_ID as u16;

/// Glyph slots per font
pub const MAX_CHARS_IN_FONT: usize = 256;
