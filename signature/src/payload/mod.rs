// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

pub(crate) mod paranoid;
pub mod simple_signing;
