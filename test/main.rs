// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT


use anyhow::Result;
use std::{
    fs::{create_dir_all, read_to_string, write},
    path::{Path, PathBuf},
};
use x2deploy::ExecutionTarget;

/// Stock configuration files of a fresh X2CRM installation.
pub(crate) const CONSTANTS_PHP: &str = "<?php
defined('YII_DEBUG') or define('YII_DEBUG',false);
defined('YII_TRACE_LEVEL') or define('YII_TRACE_LEVEL',0);
defined('YII_UNIT_TESTING') or define('YII_UNIT_TESTING',false);
defined('X2_DEBUG_EMAIL') or define('X2_DEBUG_EMAIL',false);
";

pub(crate) const DB_CONFIG_PHP: &str = "<?php
$host='localhost';
$user='x2';
$dbname='x2crm';
";

pub(crate) struct InstallFixture {
    root: PathBuf,
}

impl InstallFixture {
    pub(crate) fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();

        // INVARIANT: Always lay out files the way stock X2CRM does.
        create_dir_all(root.join("protected/config"))?;
        write(root.join("constants.php"), CONSTANTS_PHP)?;
        write(root.join("protected/config/dbConfig.php"), DB_CONFIG_PHP)?;

        Ok(Self { root })
    }

    pub(crate) fn target(&self) -> Result<ExecutionTarget> {
        Ok(ExecutionTarget::local(std::env::current_dir()?.join(&self.root)))
    }

    pub(crate) fn read(&self, relative: impl AsRef<Path>) -> Result<String> {
        Ok(read_to_string(self.root.join(relative))?)
    }
}
