// Links the plugin crates so their `inventory` registrations reach the binary.
// Keep in sync with the `modules/` members of the workspace.
#![allow(unused_imports)]

use cdi_module as _;
use rest_module as _;
